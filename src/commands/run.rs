use crate::api::{self, Mode, Runtime, TokenManager};
use crate::commands::Out;
use crate::workflow::{DeletionWorkflow, Summary};
use crate::{dates, Config, Result};
use chrono::NaiveDate;
use tracing::{error, info};

/// Handles `reaper run`: acquires a client and runs the deletion workflow over the intake sheet
/// as of today in the configured timezone.
///
/// Row errors do not fail the command. They are logged and listed in the summary.
pub async fn run(config: &Config, runtime: Runtime, mode: Mode, dry_run: bool) -> Result<Out<Summary>> {
    let manager = api::token_manager(config, runtime, mode).await?;
    let today = dates::today_in(config.timezone());
    run_on(&manager, config, today, dry_run).await
}

pub(super) async fn run_on(
    manager: &TokenManager,
    config: &Config,
    today: NaiveDate,
    dry_run: bool,
) -> Result<Out<Summary>> {
    let client = manager.acquire_client(config.scopes()).await?;
    info!("Running the deletion workflow for {today} ({})", config.timezone());
    let summary = DeletionWorkflow::new(client.client(), config.columns())
        .with_dry_run(dry_run)
        .run(config.intake_sheet_url(), today)
        .await?;

    for e in &summary.errors {
        error!("Row {} (id {}): {}", e.row_index, e.row_id, e.error);
    }
    let message = if dry_run {
        format!(
            "Dry run complete: {} rows processed, {} workspaces would be deleted, {} errors",
            summary.processed_rows,
            summary.planned_deletions.len(),
            summary.errors.len()
        )
    } else {
        format!(
            "Run complete: {} rows processed, {} workspaces deleted, {} skipped, {} errors",
            summary.processed_rows,
            summary.successful_deletions,
            summary.skipped,
            summary.errors.len()
        )
    };
    Ok(Out::new(message, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    }

    #[tokio::test]
    async fn test_run_in_test_mode() {
        let env = TestEnv::new().await;
        let config = env.config();
        let manager = api::token_manager(&config, Runtime::Local, Mode::Test)
            .await
            .unwrap();
        let out = run_on(&manager, &config, today(), false).await.unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(5, summary.processed_rows);
        assert_eq!(2, summary.successful_deletions);
        assert!(out.message().starts_with("Run complete"));
    }

    #[tokio::test]
    async fn test_dry_run_in_test_mode() {
        let env = TestEnv::new().await;
        let config = env.config();
        let manager = api::token_manager(&config, Runtime::Local, Mode::Test)
            .await
            .unwrap();
        let out = run_on(&manager, &config, today(), true).await.unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(0, summary.successful_deletions);
        assert_eq!(2, summary.planned_deletions.len());
    }
}
