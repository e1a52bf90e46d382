//! The remote secret store used in the serverless runtime.
//!
//! `SecretsClient` is the seam. `AwsSecrets` implements it with AWS Secrets Manager and
//! `MemorySecrets` holds secrets in memory so that the serverless path can be exercised without
//! an AWS account.

use crate::error::{Error, ErrorType};
use crate::Result;
use async_trait::async_trait;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, SdkError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The names of the four secret entries the app uses.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretNames {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            access_token: "ausw2p-smgr-smt-access-token-001".to_string(),
            refresh_token: "ausw2p-smgr-smt-refresh-token-002".to_string(),
            client_id: "ausw2p-smgr-smt-client-id-003".to_string(),
            client_secret: "ausw2p-smgr-smt-client-secret-004".to_string(),
        }
    }
}

/// The outcome of writing a new value to an existing secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Put {
    Updated,
    /// There is no secret with that name; it needs to be created.
    NotFound,
}

#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// The string payload of the secret, or `None` if no such secret exists.
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;

    /// Stores a new value for an existing secret.
    async fn put_secret(&self, name: &str, value: &str) -> Result<Put>;

    async fn create_secret(&self, name: &str, value: &str) -> Result<()>;

    /// Update the secret, creating it if it does not exist.
    async fn upsert_secret(&self, name: &str, value: &str) -> Result<()> {
        match self.put_secret(name, value).await? {
            Put::Updated => Ok(()),
            Put::NotFound => {
                debug!("Secret '{name}' does not exist, creating it");
                self.create_secret(name, value).await
            }
        }
    }
}

/// Reads `key` out of a secret payload. The payload is usually a JSON object with the value
/// under `key`. A JSON string or a bare non-JSON string is accepted as the value itself.
pub(crate) fn json_field(payload: &str, key: &str) -> Option<String> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => map
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.is_empty()),
        Ok(serde_json::Value::String(s)) => Some(s).filter(|s| !s.is_empty()),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}

/// AWS Secrets Manager. Region and credentials come from the standard AWS environment.
pub struct AwsSecrets {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecrets {
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&config),
        }
    }
}

fn sdk_error<E, R>(action: &str, name: &str, e: &SdkError<E, R>) -> Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let error_type = match e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorType::Network,
        _ => ErrorType::Storage,
    };
    Error::message(
        error_type,
        format!(
            "Unable to {action} secret '{name}': {}",
            DisplayErrorContext(e)
        ),
    )
}

#[async_trait]
impl SecretsClient for AwsSecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        match self.client.get_secret_value().secret_id(name).send().await {
            Ok(output) => match output.secret_string() {
                Some(s) => Ok(Some(s.to_string())),
                None => Err(Error::message(
                    ErrorType::Storage,
                    format!("The secret '{name}' does not contain a string value"),
                )),
            },
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|s| s.is_resource_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    Ok(None)
                } else {
                    Err(sdk_error("read", name, &e))
                }
            }
        }
    }

    async fn put_secret(&self, name: &str, value: &str) -> Result<Put> {
        match self
            .client
            .put_secret_value()
            .secret_id(name)
            .secret_string(value)
            .send()
            .await
        {
            Ok(_) => Ok(Put::Updated),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|s| s.is_resource_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    Ok(Put::NotFound)
                } else {
                    Err(sdk_error("update", name, &e))
                }
            }
        }
    }

    async fn create_secret(&self, name: &str, value: &str) -> Result<()> {
        self.client
            .create_secret()
            .name(name)
            .secret_string(value)
            .send()
            .await
            .map_err(|e| sdk_error("create", name, &e))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    secrets: HashMap<String, String>,
    fail_reads: bool,
    fail_writes: bool,
    failing_names: HashSet<String>,
}

impl MemoryState {
    fn write_denied(&self, name: &str) -> bool {
        self.fail_writes || self.failing_names.contains(name)
    }
}

/// An in-memory `SecretsClient`. Clones share the same secrets.
#[derive(Debug, Default, Clone)]
pub struct MemorySecrets {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().secrets.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().secrets.get(name).cloned()
    }

    /// Makes every read fail as if the service were unreachable.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Makes every write fail as if permission were denied.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Makes writes to the secret `name` fail while other secrets stay writable.
    pub fn fail_writes_to(&self, name: impl Into<String>) {
        self.lock().failing_names.insert(name.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the map half-written.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SecretsClient for MemorySecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(Error::message(
                ErrorType::Network,
                format!("Unable to read secret '{name}': service unavailable"),
            ));
        }
        Ok(state.secrets.get(name).cloned())
    }

    async fn put_secret(&self, name: &str, value: &str) -> Result<Put> {
        let mut state = self.lock();
        if state.write_denied(name) {
            return Err(Error::message(
                ErrorType::Storage,
                format!("Unable to update secret '{name}': access denied"),
            ));
        }
        match state.secrets.get_mut(name) {
            Some(existing) => {
                *existing = value.to_string();
                Ok(Put::Updated)
            }
            None => Ok(Put::NotFound),
        }
    }

    async fn create_secret(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        if state.write_denied(name) {
            return Err(Error::message(
                ErrorType::Storage,
                format!("Unable to create secret '{name}': access denied"),
            ));
        }
        if state.secrets.contains_key(name) {
            return Err(Error::message(
                ErrorType::Storage,
                format!("The secret '{name}' already exists"),
            ));
        }
        state.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
