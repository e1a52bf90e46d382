//! Persistence for the current `TokenPair`.
//!
//! There are two backends behind the `TokenStore` trait: a JSON file for local runs and the
//! remote secret store for serverless runs. The token manager only ever sees the trait.

use crate::api::files::{File, TokenFile};
use crate::api::oauth::TokenPair;
use crate::api::secrets::{json_field, SecretNames, SecretsClient};
use crate::error::{ErrorType, IntoResult};
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The stored pair, or `None` if nothing usable has been stored.
    async fn load(&self) -> Result<Option<TokenPair>>;

    /// Replaces the stored pair as a whole.
    async fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// A short description of where tokens are kept, for log messages.
    fn describe(&self) -> String;
}

/// Keeps tokens in a local JSON file, `{"accessToken": "...", "refreshToken": "..."}`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>> {
        if !self.path.is_file() {
            debug!("No token file at {}", self.path.display());
            return Ok(None);
        }
        let file = File::<TokenFile>::load(&self.path)
            .await
            .pub_result(ErrorType::Storage)?;
        let data = file.into_data();
        if data.access_token.is_empty() {
            debug!("The token file at {} has no access token", self.path.display());
            return Ok(None);
        }
        info!("Loaded tokens from {}", self.path.display());
        Ok(Some(TokenPair::new(data.access_token, data.refresh_token)))
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        let data = TokenFile {
            access_token: tokens.access_token().to_string(),
            refresh_token: tokens.refresh_token().unwrap_or_default().to_string(),
        };
        File::new(&self.path, data)
            .save()
            .await
            .pub_result(ErrorType::Storage)?;
        info!("Saved tokens to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("token file {}", self.path.display())
    }
}

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Keeps the access and refresh tokens in two independently named secrets. Each payload is
/// `{"accessToken": "..."}` or `{"refreshToken": "..."}`; plain strings are accepted on load.
pub struct SecretTokenStore {
    secrets: Arc<dyn SecretsClient>,
    names: SecretNames,
}

impl SecretTokenStore {
    pub fn new(secrets: Arc<dyn SecretsClient>, names: SecretNames) -> Self {
        Self { secrets, names }
    }
}

#[async_trait]
impl TokenStore for SecretTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>> {
        let access = self.secrets.get_secret(&self.names.access_token).await?;
        let access = match access.and_then(|p| json_field(&p, ACCESS_TOKEN_KEY)) {
            Some(a) => a,
            None => {
                debug!("No access token in secret '{}'", self.names.access_token);
                return Ok(None);
            }
        };
        let refresh = self
            .secrets
            .get_secret(&self.names.refresh_token)
            .await?
            .and_then(|p| json_field(&p, REFRESH_TOKEN_KEY))
            .unwrap_or_default();
        info!("Loaded tokens from the secret store");
        Ok(Some(TokenPair::new(access, refresh)))
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        let refresh = serde_json::json!({
            REFRESH_TOKEN_KEY: tokens.refresh_token().unwrap_or_default()
        })
        .to_string();
        let access = serde_json::json!({ ACCESS_TOKEN_KEY: tokens.access_token() }).to_string();

        // The refresh token goes first. If the access write then fails, the stored refresh token
        // is still the one the server accepts and the next run refreshes its way back.
        self.secrets
            .upsert_secret(&self.names.refresh_token, &refresh)
            .await
            .map_err(|e| e.context("Unable to save the refresh token"))?;
        if let Err(e) = self
            .secrets
            .upsert_secret(&self.names.access_token, &access)
            .await
        {
            warn!(
                "The refresh token was saved but the access token was not; the next run will \
                refresh"
            );
            return Err(e.context("Unable to save the access token"));
        }
        info!("Saved tokens to the secret store");
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "secrets '{}' and '{}'",
            self.names.access_token, self.names.refresh_token
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::secrets::MemorySecrets;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join(".secrets").join("token.json"));
        assert!(store.load().await.unwrap().is_none());

        let tokens = TokenPair::new("access-1", "refresh-1");
        store.save(&tokens).await.unwrap();
        assert_eq!(Some(tokens), store.load().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        crate::utils::write(&path, "not json").await.unwrap();
        let err = FileTokenStore::new(&path).load().await.unwrap_err();
        assert!(err.is(ErrorType::Storage));
    }

    #[tokio::test]
    async fn test_secret_store_round_trip() {
        let secrets = MemorySecrets::new();
        let store = SecretTokenStore::new(Arc::new(secrets.clone()), SecretNames::default());
        assert!(store.load().await.unwrap().is_none());

        let tokens = TokenPair::new("access-1", "refresh-1");
        store.save(&tokens).await.unwrap();
        assert_eq!(Some(tokens.clone()), store.load().await.unwrap());

        let raw = secrets.get(&SecretNames::default().access_token).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!("access-1", json["accessToken"]);

        // Saving again updates the existing secrets.
        let rotated = TokenPair::new("access-2", "refresh-2");
        store.save(&rotated).await.unwrap();
        assert_eq!(Some(rotated), store.load().await.unwrap());
    }

    #[tokio::test]
    async fn test_secret_store_accepts_plain_payloads() {
        let names = SecretNames::default();
        let secrets = MemorySecrets::new()
            .with_secret(&names.access_token, "plain-access")
            .with_secret(&names.refresh_token, "plain-refresh");
        let store = SecretTokenStore::new(Arc::new(secrets), names);
        assert_eq!(
            Some(TokenPair::new("plain-access", "plain-refresh")),
            store.load().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_secret_store_failed_access_write_keeps_refreshable_pair() {
        let names = SecretNames::default();
        let secrets = MemorySecrets::new();
        let store = SecretTokenStore::new(Arc::new(secrets.clone()), names.clone());
        store.save(&TokenPair::new("a1", "r1")).await.unwrap();

        secrets.fail_writes_to(&names.access_token);
        let err = store.save(&TokenPair::new("a2", "r2")).await.unwrap_err();
        assert!(err.is(ErrorType::Storage));

        // The rotated refresh token is stored, so the stale access token can be replaced.
        assert_eq!(
            Some(TokenPair::new("a1", "r2")),
            store.load().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_secret_store_failed_refresh_write_keeps_old_pair() {
        let names = SecretNames::default();
        let secrets = MemorySecrets::new();
        let store = SecretTokenStore::new(Arc::new(secrets.clone()), names.clone());
        store.save(&TokenPair::new("a1", "r1")).await.unwrap();

        secrets.fail_writes_to(&names.refresh_token);
        let err = store.save(&TokenPair::new("a2", "r2")).await.unwrap_err();
        assert!(err.is(ErrorType::Storage));
        assert_eq!(
            Some(TokenPair::new("a1", "r1")),
            store.load().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_secret_store_saves_missing_refresh_token_as_empty() {
        let store = SecretTokenStore::new(Arc::new(MemorySecrets::new()), SecretNames::default());
        store.save(&TokenPair::new("a1", "r1")).await.unwrap();
        store.save(&TokenPair::new("a2", "")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!("a2", loaded.access_token());
        assert_eq!(None, loaded.refresh_token());
    }

    #[tokio::test]
    async fn test_secret_store_save_failure_is_surfaced() {
        let secrets = MemorySecrets::new();
        secrets.set_fail_writes(true);
        let store = SecretTokenStore::new(Arc::new(secrets), SecretNames::default());
        let err = store
            .save(&TokenPair::new("a", "r"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorType::Storage));
    }
}
