//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::api::{TEST_COLUMNS, TEST_INTAKE_SHEET_URL};
use crate::Config;
use std::path::Path;
use tempfile::TempDir;

/// A reaper home directory whose config points at the seeded in-memory intake sheet. Holds the
/// `TempDir` to keep the directory alive for the duration of the test.
pub(crate) struct TestEnv {
    _temp_dir: TempDir,
    config: Config,
}

impl TestEnv {
    pub(crate) async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("reaper");
        let secret_path = temp_dir.path().join("client_secret.json");
        std::fs::write(
            &secret_path,
            r#"{"client_id": "test-client-id", "client_secret": "test-client-secret"}"#,
        )
        .unwrap();

        let config = Config::create(&root, TEST_INTAKE_SHEET_URL, TEST_COLUMNS, Some(&secret_path))
            .await
            .unwrap();
        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    pub(crate) fn config(&self) -> Config {
        self.config.clone()
    }

    pub(crate) fn root(&self) -> &Path {
        self.config.root()
    }
}
