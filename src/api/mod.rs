//! Everything that talks to the outside world: the Smartsheet REST API, the OAuth token endpoint,
//! the browser and the two places tokens are persisted.
//!
//! The seams are traits so that the whole app can run, top to bottom, against in-memory doubles:
//! `Smartsheet` (the repository), `TokenEndpoint`, `Authorizer`, `TokenStore` and
//! `SecretsClient`.

mod authorize;
mod callback;
mod files;
mod oauth;
mod secrets;
mod smartsheet_client;
mod test_client;
mod token_manager;
mod token_store;

pub use authorize::{Authorizer, CodePrompt, InteractiveFlow, NonInteractive, StdinPrompt};
pub(crate) use files::SecretFile;
pub use oauth::{
    AuthorizationCode, OAuthClient, OAuthCredentials, RefreshFailure, RefreshFailureRecord,
    TokenEndpoint, TokenPair,
};
pub use secrets::{AwsSecrets, MemorySecrets, Put, SecretNames, SecretsClient};
pub use smartsheet_client::{HttpFactory, SmartsheetClient};
pub use test_client::{
    Script, ScriptedAuthorizer, ScriptedEndpoint, TestFactory, TestSmartsheet, TestState,
    TEST_ACCESS_TOKEN, TEST_COLUMNS, TEST_INTAKE_SHEET_ID, TEST_INTAKE_SHEET_URL,
    TEST_REFRESH_TOKEN,
};
pub use token_manager::{AuthenticatedClient, TokenManager, TokenSource};
pub use token_store::{FileTokenStore, SecretTokenStore, TokenStore};

use crate::model::{Column, Id, Sheet, SheetSummary, User, Workspace};
use crate::{Config, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The Smartsheet operations the app needs.
#[async_trait]
pub trait Smartsheet: Send + Sync {
    /// The owner of the access token. Also used as a cheap probe of token validity.
    async fn current_user(&self) -> Result<User>;

    /// Every workspace the user can see.
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;

    /// Every sheet the user can see, across all pages.
    async fn list_sheets(&self) -> Result<Vec<SheetSummary>>;

    /// A sheet with its columns and rows.
    async fn get_sheet(&self, sheet_id: Id) -> Result<Sheet>;

    async fn get_columns(&self, sheet_id: Id) -> Result<Vec<Column>>;

    /// Sets one cell. Values are written with `strict: false` so that text lands in any column
    /// type.
    async fn update_cell(&self, sheet_id: Id, row_id: Id, column_id: Id, value: &str)
        -> Result<()>;

    /// Deletes a workspace and everything in it. `Ok(false)` means the API answered but did not
    /// report success.
    async fn delete_workspace(&self, workspace_id: Id) -> Result<bool>;
}

/// Wraps an access token into a `Smartsheet` client.
pub trait ClientFactory: Send + Sync {
    fn create(&self, access_token: &str) -> Result<Box<dyn Smartsheet>>;
}

const TEST_MODE_ENV: &str = "REAPER_TEST_MODE";

/// Selects the live Smartsheet API or the in-memory repository.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Smartsheet,
    Test,
}

serde_plain::derive_display_from_serialize!(Mode);

impl Mode {
    /// `Mode::Test` when `REAPER_TEST_MODE` is set and non-empty, otherwise `Mode::Smartsheet`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(v) if !v.is_empty() => Mode::Test,
            _ => Mode::Smartsheet,
        }
    }
}

/// Where the process is running. Decides which token store, credential source and authorizer
/// are used.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    #[default]
    Local,
    Serverless,
}

serde_plain::derive_display_from_serialize!(Runtime);

impl Runtime {
    /// `Runtime::Serverless` inside AWS Lambda.
    pub fn detect() -> Self {
        let lambda = ["AWS_LAMBDA_FUNCTION_NAME", "AWS_EXECUTION_ENV"]
            .iter()
            .any(|key| std::env::var_os(key).is_some());
        if lambda {
            Runtime::Serverless
        } else {
            Runtime::Local
        }
    }
}

/// Builds a `TokenManager` wired for `runtime` and `mode`.
///
/// In test mode the in-memory repository is used together with a token store that already holds
/// a token it accepts, so no network or browser is involved.
pub async fn token_manager(config: &Config, runtime: Runtime, mode: Mode) -> Result<TokenManager> {
    debug!("Building the token manager for runtime {runtime} in mode {mode}");
    if mode == Mode::Test {
        return test_client::token_manager(config);
    }

    let credentials;
    let store: Arc<dyn TokenStore>;
    let authorizer: Arc<dyn Authorizer>;
    match runtime {
        Runtime::Local => {
            credentials = OAuthCredentials::load_local(&config.client_secret_path()).await?;
            store = Arc::new(FileTokenStore::new(config.token_path()));
            authorizer = Arc::new(InteractiveFlow::new());
        }
        Runtime::Serverless => {
            let secrets: Arc<dyn SecretsClient> = Arc::new(AwsSecrets::from_env().await);
            credentials =
                OAuthCredentials::load_from_secrets(secrets.as_ref(), config.secret_names())
                    .await?;
            store = Arc::new(SecretTokenStore::new(
                secrets,
                config.secret_names().clone(),
            ));
            authorizer = Arc::new(NonInteractive);
        }
    }

    let endpoint = Arc::new(OAuthClient::new(&credentials, config.redirect_uri())?);
    Ok(TokenManager::new(
        store,
        endpoint,
        authorizer,
        Arc::new(HttpFactory::default()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!("test", Mode::Test.to_string());
        assert_eq!("serverless", Runtime::Serverless.to_string());
    }
}
