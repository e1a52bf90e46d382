//! Configuration file handling.
//!
//! The configuration file is stored at `$REAPER_HOME/config.json`. It names the intake sheet and
//! its columns, the timezone that decides what "today" is, the OAuth settings, and where tokens
//! and client credentials are kept.

use crate::api::{SecretFile, SecretNames};
use crate::error::{ErrorType, IntoResult, Res};
use crate::links::{self, SHEETS};
use crate::model::IntakeColumns;
use crate::{dates, utils, Result};
use anyhow::{bail, ensure, Context};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "smartsheet-reaper";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";

const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";
const DEFAULT_SCOPES: &[&str] = &[
    "READ_USERS",
    "READ_SHEETS",
    "WRITE_SHEETS",
    "DELETE_SHEETS",
    "ADMIN_WORKSPACES",
    "SHARE_SHEETS",
    "SHARE_SIGHTS",
];

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$REAPER_HOME` and from there it loads `$REAPER_HOME/config.json`. It provides
/// paths to the files that are either configurable or expected in a certain location within the
/// home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    timezone: Tz,
}

impl Config {
    /// Creates the home directory and its `.secrets` subdirectory, then writes an initial
    /// `config.json` for `sheet_url` and `columns`. If `secret_file` is given, it must hold the
    /// OAuth client credentials and is copied to its default location in `.secrets`.
    pub async fn create(
        dir: impl Into<PathBuf>,
        sheet_url: &str,
        columns: IntakeColumns,
        secret_file: Option<&Path>,
    ) -> Result<Self> {
        Self::create_internal(dir.into(), sheet_url, columns, secret_file)
            .await
            .pub_result(ErrorType::Configuration)
    }

    async fn create_internal(
        maybe_relative: PathBuf,
        sheet_url: &str,
        columns: IntakeColumns,
        secret_file: Option<&Path>,
    ) -> Res<Self> {
        validate_sheet_url(sheet_url)?;
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the reaper home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;
        let secrets = root.join(SECRETS);
        utils::make_dir(&secrets).await?;

        if let Some(secret_file) = secret_file {
            let credentials: SecretFile = utils::deserialize(secret_file)
                .await
                .context("The client secret file is not valid")?;
            ensure!(
                !credentials.client_id.is_empty() && !credentials.client_secret.is_empty(),
                "The client secret file must contain client_id and client_secret"
            );
            utils::copy(secret_file, secrets.join(CLIENT_SECRET_JSON)).await?;
        }

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            intake_sheet_url: sheet_url.to_string(),
            columns,
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;
        let timezone = dates::parse_timezone(&config_file.timezone)?;

        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            timezone,
        })
    }

    /// This will
    /// - validate that `reaper_home` and its config file exist
    /// - load and validate the config file
    /// - validate that the secrets directory exists
    pub async fn load(reaper_home: impl Into<PathBuf>) -> Result<Self> {
        Self::load_internal(reaper_home.into())
            .await
            .pub_result(ErrorType::Configuration)
    }

    async fn load_internal(maybe_relative: PathBuf) -> Res<Self> {
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The reaper home directory is missing, run 'reaper init' first")?;
        let _ = utils::read_dir(&root)
            .await
            .context("The reaper home directory is not readable")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        validate_sheet_url(&config_file.intake_sheet_url)?;
        let timezone = dates::parse_timezone(&config_file.timezone)?;

        let config = Self {
            secrets: root.join(SECRETS),
            root,
            config_path,
            config_file,
            timezone,
        };
        if !config.secrets.is_dir() {
            bail!(
                "The secrets directory is missing '{}'",
                config.secrets.display()
            )
        }
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn intake_sheet_url(&self) -> &str {
        &self.config_file.intake_sheet_url
    }

    pub fn columns(&self) -> IntakeColumns {
        self.config_file.columns
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn redirect_uri(&self) -> &str {
        &self.config_file.redirect_uri
    }

    pub fn scopes(&self) -> &[String] {
        &self.config_file.scopes
    }

    pub fn secret_names(&self) -> &SecretNames {
        &self.config_file.secrets
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the relative path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve(self.config_file.token_path())
    }

    fn resolve(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }

    /// A printable view of the configuration. It holds no secrets.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            home: self.root.clone(),
            config_path: self.config_path.clone(),
            intake_sheet_url: self.config_file.intake_sheet_url.clone(),
            columns: self.config_file.columns,
            timezone: self.config_file.timezone.clone(),
            redirect_uri: self.config_file.redirect_uri.clone(),
            scopes: self.config_file.scopes.clone(),
            token_path: self.token_path(),
            client_secret_path: self.client_secret_path(),
            secrets: self.config_file.secrets.clone(),
        }
    }
}

/// What `reaper config` prints.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub intake_sheet_url: String,
    pub columns: IntakeColumns,
    pub timezone: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_path: PathBuf,
    pub client_secret_path: PathBuf,
    pub secrets: SecretNames,
}

/// The intake sheet URL must point at a sheet, e.g. `https://app.smartsheet.com/sheets/<id>`.
fn validate_sheet_url(url: &str) -> Res<()> {
    ensure!(
        !url.trim().is_empty(),
        "The intake sheet URL is not configured"
    );
    ensure!(
        links::pattern_tail(links::remove_query_string(url), SHEETS).is_some(),
        "The intake sheet URL '{url}' does not look like a Smartsheet sheet link"
    );
    Ok(())
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "smartsheet-reaper",
///   "config_version": 1,
///   "intake_sheet_url": "https://app.smartsheet.com/sheets/Gx7Q9vR2",
///   "columns": {
///     "folder_url": 8294374739568516,
///     "deletion_date": 975988182681476,
///     "em_notification_date": 3227787996366724,
///     "deletion_status": 5479587810051972
///   },
///   "timezone": "America/Los_Angeles",
///   "redirect_uri": "http://localhost:8080/callback",
///   "scopes": ["READ_USERS", "READ_SHEETS"],
///   "token_path": ".secrets/token.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "smartsheet-reaper"
    app_name: String,

    config_version: u8,

    /// Link to the intake sheet
    intake_sheet_url: String,

    #[serde(default)]
    columns: IntakeColumns,

    /// IANA timezone in which "today" is computed
    #[serde(default = "default_timezone")]
    timezone: String,

    #[serde(default = "default_redirect_uri")]
    redirect_uri: String,

    #[serde(default = "default_scopes")]
    scopes: Vec<String>,

    /// Path to the token file (optional, relative to the home directory or absolute)
    /// Defaults to $REAPER_HOME/.secrets/token.json if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,

    /// Path to the OAuth client credentials file (optional, relative to the home directory or
    /// absolute). Defaults to $REAPER_HOME/.secrets/client_secret.json if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Names of the remote secret entries used in the serverless runtime
    #[serde(default)]
    secrets: SecretNames,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            intake_sheet_url: String::new(),
            columns: IntakeColumns::default(),
            timezone: default_timezone(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            token_path: None,
            client_secret_path: None,
            secrets: SecretNames::default(),
        }
    }
}

impl ConfigFile {
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .with_context(|| format!("Failed to load config file at {}", path.display()))?;
        ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(path, data)
            .await
            .context("Unable to write config file")
    }

    fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://app.smartsheet.com/sheets/Gx7Q9vR2?view=grid";

    fn columns() -> IntakeColumns {
        IntakeColumns {
            folder_url: 1,
            deletion_date: 2,
            em_notification_date: 3,
            deletion_status: 4,
        }
    }

    #[tokio::test]
    async fn test_config_create_and_load() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("reaper_home");
        let secret_file = dir.path().join("creds.json");
        utils::write(
            &secret_file,
            r#"{"client_id": "abc", "client_secret": "def"}"#,
        )
        .await
        .unwrap();

        let config = Config::create(&home, URL, columns(), Some(&secret_file))
            .await
            .unwrap();
        assert_eq!(URL, config.intake_sheet_url());
        assert!(config.secrets().is_dir());
        assert!(config.client_secret_path().is_file());
        assert_eq!(config.secrets().join(TOKEN_JSON), config.token_path());

        let loaded = Config::load(&home).await.unwrap();
        assert_eq!(columns(), loaded.columns());
        assert_eq!(chrono_tz::America::Los_Angeles, loaded.timezone());
        assert_eq!(DEFAULT_REDIRECT_URI, loaded.redirect_uri());
        assert_eq!(7, loaded.scopes().len());
        assert_eq!(&SecretNames::default(), loaded.secret_names());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_secret_file() {
        let dir = TempDir::new().unwrap();
        let secret_file = dir.path().join("creds.json");
        utils::write(&secret_file, "{}").await.unwrap();
        let err = Config::create(dir.path().join("h"), URL, columns(), Some(&secret_file))
            .await
            .unwrap_err();
        assert!(err.is(ErrorType::Configuration));
    }

    #[tokio::test]
    async fn test_load_missing_home() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope")).await.unwrap_err();
        assert!(err.is(ErrorType::Configuration));
    }

    #[tokio::test]
    async fn test_load_minimal_config() {
        let dir = TempDir::new().unwrap();
        utils::make_dir(dir.path().join(SECRETS)).await.unwrap();
        let json = r#"{
            "app_name": "smartsheet-reaper",
            "config_version": 1,
            "intake_sheet_url": "https://app.smartsheet.com/sheets/abc",
            "timezone": "Europe/Berlin",
            "token_path": "/tmp/elsewhere/token.json"
        }"#;
        utils::write(dir.path().join(CONFIG_JSON), json).await.unwrap();

        let config = Config::load(dir.path()).await.unwrap();
        assert_eq!(chrono_tz::Europe::Berlin, config.timezone());
        assert_eq!(PathBuf::from("/tmp/elsewhere/token.json"), config.token_path());
        assert_eq!(
            config.root().join(SECRETS).join(CLIENT_SECRET_JSON),
            config.client_secret_path()
        );
        assert!(!config.columns().is_complete());
    }

    #[tokio::test]
    async fn test_load_rejects_wrong_app_name() {
        let dir = TempDir::new().unwrap();
        utils::make_dir(dir.path().join(SECRETS)).await.unwrap();
        let json = r#"{
            "app_name": "some-other-app",
            "config_version": 1,
            "intake_sheet_url": "https://app.smartsheet.com/sheets/abc"
        }"#;
        utils::write(dir.path().join(CONFIG_JSON), json).await.unwrap();
        let err = Config::load(dir.path()).await.unwrap_err();
        assert!(err.is(ErrorType::Configuration));
        assert!(format!("{err}").contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_timezone() {
        let dir = TempDir::new().unwrap();
        utils::make_dir(dir.path().join(SECRETS)).await.unwrap();
        let json = r#"{
            "app_name": "smartsheet-reaper",
            "config_version": 1,
            "intake_sheet_url": "https://app.smartsheet.com/sheets/abc",
            "timezone": "Mars/Olympus_Mons"
        }"#;
        utils::write(dir.path().join(CONFIG_JSON), json).await.unwrap();
        assert!(Config::load(dir.path()).await.is_err());
    }

    #[test]
    fn test_validate_sheet_url() {
        assert!(validate_sheet_url(URL).is_ok());
        assert!(validate_sheet_url("").is_err());
        assert!(validate_sheet_url("https://app.smartsheet.com/workspaces/abc").is_err());
        assert!(validate_sheet_url("https://app.smartsheet.com/sheets/").is_err());
    }

    #[test]
    fn test_serialization_omits_none_paths() {
        let json = serde_json::to_string(&ConfigFile::default()).unwrap();
        assert!(!json.contains("token_path"));
        assert!(!json.contains("client_secret_path"));
        assert!(json.contains("ausw2p-smgr-smt-access-token-001"));
    }
}
