//! The deletion workflow: read the intake sheet, decide which rows are due, delete their
//! workspaces and mark the rows as `Deleted`.

use crate::api::Smartsheet;
use crate::dates;
use crate::error::{Error, ErrorType};
use crate::links::{self, SHEETS, WORKSPACES};
use crate::model::{Id, IntakeColumns, IntakeRow, SheetSummary, Workspace};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// The value written to the status column after a successful deletion.
pub const DELETED: &str = "Deleted";

/// A row that could not be processed. `row_index` is the 0-based position of the row in the
/// intake sheet.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub row_id: Id,
    pub error: String,
}

/// A deletion that a dry run would have performed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlannedDeletion {
    pub row_index: usize,
    pub row_id: Id,
    pub workspace_id: Id,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub processed_rows: usize,
    pub successful_deletions: usize,
    /// Rows that were not deleted, including those that errored.
    pub skipped: usize,
    pub errors: Vec<RowError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned_deletions: Vec<PlannedDeletion>,
}

enum Outcome {
    Deleted,
    Planned(Id),
    NotDue,
}

pub struct DeletionWorkflow<'a> {
    client: &'a dyn Smartsheet,
    columns: IntakeColumns,
    dry_run: bool,
}

impl<'a> DeletionWorkflow<'a> {
    pub fn new(client: &'a dyn Smartsheet, columns: IntakeColumns) -> Self {
        Self {
            client,
            columns,
            dry_run: false,
        }
    }

    /// Evaluate and resolve everything but do not delete or update anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Processes every row of the intake sheet at `sheet_url` as of `today`. Row failures are
    /// recorded in the summary and do not stop the run. Only a failure to read the intake sheet
    /// itself is returned as an error.
    pub async fn run(&self, sheet_url: &str, today: NaiveDate) -> Result<Summary> {
        if !self.columns.is_complete() {
            return Err(Error::message(
                ErrorType::Configuration,
                "The intake sheet column ids are not configured",
            ));
        }

        let sheets = self.client.list_sheets().await?;
        let sheet_id = find_sheet(sheet_url, &sheets).ok_or_else(|| {
            Error::message(
                ErrorType::Configuration,
                format!("Could not find the intake sheet for URL: {sheet_url}"),
            )
        })?;
        let sheet_columns = self
            .client
            .get_columns(sheet_id)
            .await
            .map_err(|e| e.context(format!("Failed to get the columns of sheet {sheet_id}")))?;
        let missing = self.columns.missing_from(&sheet_columns);
        if !missing.is_empty() {
            return Err(Error::message(
                ErrorType::Configuration,
                format!("The intake sheet {sheet_id} has no columns with ids {missing:?}"),
            ));
        }

        let sheet = self
            .client
            .get_sheet(sheet_id)
            .await
            .map_err(|e| e.context(format!("Failed to get the intake sheet {sheet_id}")))?;

        let total = sheet.rows.len();
        info!("Processing {total} rows from sheet {sheet_id} for {today}");
        if self.dry_run {
            info!("Dry run: no workspace will be deleted and no row will be updated");
        }

        let mut summary = Summary::default();
        let mut workspaces: Option<Vec<Workspace>> = None;
        for (row_index, row) in sheet.rows.iter().enumerate() {
            debug!("Processing row {}/{total}: {}", row_index + 1, row.id);
            summary.processed_rows += 1;
            let intake = IntakeRow::extract(row, &self.columns);
            match self
                .process_row(sheet_id, &intake, today, &sheets, &mut workspaces)
                .await
            {
                Ok(Outcome::Deleted) => summary.successful_deletions += 1,
                Ok(Outcome::Planned(workspace_id)) => {
                    summary.skipped += 1;
                    summary.planned_deletions.push(PlannedDeletion {
                        row_index,
                        row_id: row.id,
                        workspace_id,
                    });
                }
                Ok(Outcome::NotDue) => summary.skipped += 1,
                Err(e) => {
                    error!("Row {} ({}): {e}", row_index, row.id);
                    summary.skipped += 1;
                    summary.errors.push(RowError {
                        row_index,
                        row_id: row.id,
                        error: format!("{:#}", e.inner()),
                    });
                }
            }
        }

        info!(
            "Processing complete: {} rows, {} deleted, {} skipped, {} errors",
            summary.processed_rows,
            summary.successful_deletions,
            summary.skipped,
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn process_row(
        &self,
        sheet_id: Id,
        row: &IntakeRow,
        today: NaiveDate,
        sheets: &[SheetSummary],
        workspaces: &mut Option<Vec<Workspace>>,
    ) -> Result<Outcome> {
        let (deletion_date, em_date) = match (&row.deletion_date, &row.em_notification_date) {
            (Some(d), Some(e)) => (d, e),
            _ => {
                debug!("Row {} is missing a date, skipping", row.row_id);
                return Ok(Outcome::NotDue);
            }
        };
        if !dates::should_delete_str(deletion_date, em_date, today) {
            debug!("Row {} is not due for deletion", row.row_id);
            return Ok(Outcome::NotDue);
        }
        info!("The workspace for row {} is due for deletion", row.row_number);

        let folder_url = match row.folder_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => {
                warn!("Row {} has no folder URL, skipping", row.row_id);
                return Ok(Outcome::NotDue);
            }
        };

        let workspace_id = self
            .resolve_workspace(folder_url, sheets, workspaces)
            .await
            .ok_or_else(|| {
                Error::message(ErrorType::ApiOperation, "Failed to get workspace ID")
            })?;

        if self.dry_run {
            info!("Dry run: would delete workspace {workspace_id} for row {}", row.row_id);
            return Ok(Outcome::Planned(workspace_id));
        }

        info!("Deleting workspace {workspace_id}");
        if !self.client.delete_workspace(workspace_id).await? {
            return Err(Error::message(
                ErrorType::ApiOperation,
                format!("Deletion failed for workspace {workspace_id}"),
            ));
        }

        match self
            .client
            .update_cell(sheet_id, row.row_id, self.columns.deletion_status, DELETED)
            .await
        {
            Ok(()) => info!("Updated the deletion status of row {}", row.row_id),
            Err(e) => error!(
                "Workspace {workspace_id} was deleted but the status of row {} was not updated: {e}",
                row.row_id
            ),
        }
        Ok(Outcome::Deleted)
    }

    /// Finds the workspace a folder URL refers to. A `workspaces/` link is matched against the
    /// workspace permalinks, anything else is treated as a sheet link and resolved to the
    /// sheet's parent workspace. Lookup failures are logged and yield `None`.
    async fn resolve_workspace(
        &self,
        url: &str,
        sheets: &[SheetSummary],
        workspaces: &mut Option<Vec<Workspace>>,
    ) -> Option<Id> {
        let url = links::remove_query_string(url);
        if links::is_workspace_link(url) {
            if workspaces.is_none() {
                match self.client.list_workspaces().await {
                    Ok(list) => *workspaces = Some(list),
                    Err(e) => {
                        error!("Failed to list workspaces: {e}");
                        return None;
                    }
                }
            }
            let found = workspaces
                .as_deref()
                .unwrap_or_default()
                .iter()
                .find(|w| links::is_pattern_substring(url, &w.permalink, WORKSPACES));
            return match found {
                Some(w) => {
                    debug!("Found workspace {} '{}' for {url}", w.id, w.name);
                    Some(w.id)
                }
                None => {
                    info!("No workspace found with permalink: {url}");
                    None
                }
            };
        }

        let sheet_id = match find_sheet(url, sheets) {
            Some(id) => id,
            None => {
                info!("No sheet found with permalink: {url}");
                return None;
            }
        };
        match self.client.get_sheet(sheet_id).await {
            Ok(sheet) => match sheet.workspace {
                Some(w) => Some(w.id),
                None => {
                    error!("Sheet {sheet_id} does not belong to a workspace");
                    None
                }
            },
            Err(e) => {
                error!("Failed to get sheet {sheet_id}: {e}");
                None
            }
        }
    }
}

/// The id of the sheet whose permalink matches `url`.
pub(crate) fn find_sheet(url: &str, sheets: &[SheetSummary]) -> Option<Id> {
    let url = links::remove_query_string(url);
    sheets
        .iter()
        .find(|s| links::is_pattern_substring(url, &s.permalink, SHEETS))
        .map(|s| s.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        TestSmartsheet, TestState, TEST_ACCESS_TOKEN, TEST_COLUMNS, TEST_INTAKE_SHEET_ID,
        TEST_INTAKE_SHEET_URL,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    }

    #[tokio::test]
    async fn test_run_deletes_due_workspaces() {
        let state = TestState::seeded();
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let summary = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap();

        assert_eq!(5, summary.processed_rows);
        assert_eq!(2, summary.successful_deletions);
        assert_eq!(3, summary.skipped);
        assert!(summary.errors.is_empty());
        assert_eq!(vec![1, 2], state.deleted());

        let updated: Vec<Id> = state.updates().iter().map(|u| u.1).collect();
        assert_eq!(vec![501, 502], updated);
        assert!(state
            .updates()
            .iter()
            .all(|u| u.0 == TEST_INTAKE_SHEET_ID && u.2 == TEST_COLUMNS.deletion_status && u.3 == DELETED));
    }

    #[tokio::test]
    async fn test_failed_delete_is_recorded_and_processing_continues() {
        let state = TestState::seeded();
        state.fail_delete(1);
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let summary = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap();

        assert_eq!(1, summary.errors.len());
        assert_eq!(0, summary.errors[0].row_index);
        assert_eq!(501, summary.errors[0].row_id);
        assert_eq!(1, summary.successful_deletions);
        assert_eq!(vec![2], state.deleted());
    }

    #[tokio::test]
    async fn test_failed_status_update_still_counts() {
        let state = TestState::seeded();
        state.set_failing_updates(true);
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let summary = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap();
        assert_eq!(2, summary.successful_deletions);
        assert!(summary.errors.is_empty());
        assert!(state.updates().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let state = TestState::seeded();
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let summary = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .with_dry_run(true)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap();

        assert_eq!(0, summary.successful_deletions);
        let planned: Vec<Id> = summary
            .planned_deletions
            .iter()
            .map(|p| p.workspace_id)
            .collect();
        assert_eq!(vec![1, 2], planned);
        assert!(state.deleted().is_empty());
        assert!(state.updates().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_workspace_is_row_error() {
        let state = TestState::seeded();
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        // Workspace 1 disappears before the run, so its `workspaces/` link resolves to nothing.
        client.delete_workspace(1).await.unwrap();
        let summary = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap();
        assert_eq!(1, summary.errors.len());
        assert_eq!("Failed to get workspace ID", summary.errors[0].error);
        assert_eq!(1, summary.successful_deletions);
    }

    #[tokio::test]
    async fn test_unknown_intake_sheet() {
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, TestState::seeded());
        let err = DeletionWorkflow::new(&client, TEST_COLUMNS)
            .run("https://app.smartsheet.com/sheets/Unknown", today())
            .await
            .unwrap_err();
        assert!(err.is(ErrorType::Configuration));
    }

    #[tokio::test]
    async fn test_incomplete_columns() {
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, TestState::seeded());
        let err = DeletionWorkflow::new(&client, IntakeColumns::default())
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap_err();
        assert!(err.is(ErrorType::Configuration));
    }

    #[tokio::test]
    async fn test_column_ids_must_exist_on_the_sheet() {
        let state = TestState::seeded();
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let columns = IntakeColumns {
            deletion_status: 999,
            ..TEST_COLUMNS
        };
        let err = DeletionWorkflow::new(&client, columns)
            .run(TEST_INTAKE_SHEET_URL, today())
            .await
            .unwrap_err();
        assert!(err.is(ErrorType::Configuration));
        assert!(err.to_string().contains("999"));
        assert!(state.deleted().is_empty());
    }

    #[test]
    fn test_find_sheet() {
        let sheets = vec![SheetSummary {
            id: 7,
            name: "x".to_string(),
            permalink: "https://app.smartsheet.com/sheets/abc".to_string(),
        }];
        assert_eq!(
            Some(7),
            find_sheet("https://app.smartsheet.com/sheets/abc?view=grid", &sheets)
        );
        assert_eq!(None, find_sheet("https://app.smartsheet.com/sheets/xyz", &sheets));
    }
}
