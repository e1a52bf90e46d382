use crate::api::{self, Mode, Runtime};
use crate::commands::Out;
use crate::export::ExportSummary;
use crate::{Config, Result};
use std::path::Path;

/// Handles `reaper export`: writes the audit CSV files into `out`.
pub async fn export(
    config: &Config,
    runtime: Runtime,
    mode: Mode,
    out: &Path,
) -> Result<Out<ExportSummary>> {
    let manager = api::token_manager(config, runtime, mode).await?;
    let client = manager.acquire_client(config.scopes()).await?;
    let summary = crate::export::export(
        client.client(),
        config.intake_sheet_url(),
        config.columns(),
        out,
    )
    .await?;
    Ok(Out::new(
        format!(
            "Exported {} sheets, {} workspaces and {} intake rows to {}",
            summary.sheets,
            summary.workspaces,
            summary.intake_rows,
            summary.directory.display()
        ),
        summary,
    ))
}
