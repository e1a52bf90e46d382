//! Writes CSV snapshots of what the account can see, for auditing the intake sheet before a run.
//!
//! - `sheets.csv`: every sheet, `id,permalink`
//! - `workspaces.csv`: workspaces we own, `id,permalink`
//! - `intake.csv`: `row_number,folder_url,folder_url_hyperlink` for each intake row

use crate::api::Smartsheet;
use crate::error::{Error, ErrorType, IntoResult, Res};
use crate::model::{Id, IntakeColumns};
use crate::{utils, workflow, Result};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SHEETS_CSV: &str = "sheets.csv";
pub const WORKSPACES_CSV: &str = "workspaces.csv";
pub const INTAKE_CSV: &str = "intake.csv";

#[derive(Debug, Clone, Serialize)]
struct PermalinkRecord<'a> {
    id: Id,
    permalink: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct IntakeRecord {
    row_number: u32,
    folder_url: Option<String>,
    folder_url_hyperlink: Option<String>,
}

/// How many records went into each file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub directory: PathBuf,
    pub sheets: usize,
    pub workspaces: usize,
    pub intake_rows: usize,
}

/// Writes the three CSV files into `dir`, creating it if needed.
pub async fn export(
    client: &dyn Smartsheet,
    intake_sheet_url: &str,
    columns: IntakeColumns,
    dir: &Path,
) -> Result<ExportSummary> {
    utils::make_dir(dir).await.pub_result(ErrorType::Storage)?;

    let sheets = client.list_sheets().await?;
    let records: Vec<_> = sheets
        .iter()
        .map(|s| PermalinkRecord {
            id: s.id,
            permalink: &s.permalink,
        })
        .collect();
    write_csv(&dir.join(SHEETS_CSV), &records)
        .await
        .pub_result(ErrorType::Storage)?;
    info!("Recorded {} sheets", records.len());

    let workspaces = client.list_workspaces().await?;
    let owned: Vec<_> = workspaces
        .iter()
        .filter(|w| w.is_owned())
        .map(|w| PermalinkRecord {
            id: w.id,
            permalink: &w.permalink,
        })
        .collect();
    write_csv(&dir.join(WORKSPACES_CSV), &owned)
        .await
        .pub_result(ErrorType::Storage)?;
    info!("Recorded {} workspaces with OWNER access", owned.len());

    let sheet_id = workflow::find_sheet(intake_sheet_url, &sheets).ok_or_else(|| {
        Error::message(
            ErrorType::Configuration,
            format!("Could not find the intake sheet for URL: {intake_sheet_url}"),
        )
    })?;
    let sheet = client.get_sheet(sheet_id).await?;
    let intake: Vec<_> = sheet
        .rows
        .iter()
        .map(|row| {
            let cell = row.cell(columns.folder_url);
            IntakeRecord {
                row_number: row.row_number,
                folder_url: cell.and_then(|c| c.text()),
                folder_url_hyperlink: cell.and_then(|c| c.link()).map(str::to_string),
            }
        })
        .collect();
    write_csv(&dir.join(INTAKE_CSV), &intake)
        .await
        .pub_result(ErrorType::Storage)?;
    info!("Recorded {} intake rows from '{}'", intake.len(), sheet.name);

    Ok(ExportSummary {
        directory: dir.to_path_buf(),
        sheets: records.len(),
        workspaces: owned.len(),
        intake_rows: intake.len(),
    })
}

async fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Res<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Unable to serialize a record for {}", path.display()))?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Unable to finish {}: {e}", path.display()))?;
    utils::write(path, data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{TestSmartsheet, TestState, TEST_ACCESS_TOKEN, TEST_COLUMNS, TEST_INTAKE_SHEET_URL};
    use crate::model::Workspace;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export() {
        let dir = TempDir::new().unwrap();
        let state = TestState::seeded();
        state.add_workspace(Workspace {
            id: 4,
            name: "Shared with us".to_string(),
            permalink: "https://app.smartsheet.com/workspaces/Shared4".to_string(),
            access_level: Some("EDITOR".to_string()),
        });
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state);

        let summary = export(&client, TEST_INTAKE_SHEET_URL, TEST_COLUMNS, dir.path())
            .await
            .unwrap();
        assert_eq!(2, summary.sheets);
        assert_eq!(3, summary.workspaces);
        assert_eq!(5, summary.intake_rows);

        let workspaces = utils::read(&dir.path().join(WORKSPACES_CSV)).await.unwrap();
        assert!(workspaces.starts_with("id,permalink\n"));
        assert!(!workspaces.contains("Shared4"));

        let intake = utils::read(&dir.path().join(INTAKE_CSV)).await.unwrap();
        let mut lines = intake.lines();
        assert_eq!(Some("row_number,folder_url,folder_url_hyperlink"), lines.next());
        assert_eq!(
            Some("1,Alpha,https://app.smartsheet.com/workspaces/AlphaWs1"),
            lines.next()
        );
    }
}
