use crate::args::InitArgs;
use crate::commands::Out;
use crate::config::ConfigSummary;
use crate::{Config, Result};
use std::path::Path;
use tracing::warn;

/// Creates the home directory, writes `config.json` and, if given, copies the client credentials
/// file into `.secrets`.
///
/// # Errors
/// - Returns a `Configuration` error if the sheet URL or credentials file is invalid or any file
///   operation fails.
pub async fn init(home: &Path, args: &InitArgs) -> Result<Out<ConfigSummary>> {
    let config = Config::create(home, args.sheet_url(), args.columns(), args.client_secret())
        .await
        .map_err(|e| e.context("Unable to create the home directory and config"))?;
    if !config.columns().is_complete() {
        warn!(
            "Not all intake column ids were given. Set them in {} before running 'reaper run'.",
            config.config_path().display()
        );
    }
    Ok(Out::new(
        format!(
            "Successfully created the reaper home directory at {}",
            config.root().display()
        ),
        config.summary(),
    ))
}
