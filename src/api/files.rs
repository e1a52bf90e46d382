//! Serialization and deserialization structures for the files kept in the `.secrets` directory.
//! - `token.json`: the persisted access and refresh tokens
//! - `client_secret.json`: the OAuth client id and secret of the Smartsheet app

use crate::error::Res;
use crate::utils;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

/// Represents a file that we want to `Serialize`, `Deserialize`, and read from memory in-between
/// serializations and deserialization. Basically we are just holding the `path` and the `data`
/// here.
#[derive(Default, Debug, Clone)]
pub(super) struct File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    path: PathBuf,
    data: F,
}

impl<F> File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    /// Load data from a file and create a File instance
    pub(super) async fn load(path: impl Into<PathBuf>) -> Res<Self> {
        let path = path.into();
        let data: F = utils::deserialize(&path).await?;
        Ok(Self { path, data })
    }

    /// Create a File instance with the given path and data
    pub(super) fn new(path: impl Into<PathBuf>, data: F) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Save the current data to the file, creating its parent directory if needed.
    pub(super) async fn save(&self) -> Res<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                utils::make_dir(parent).await?;
            }
        }
        let json =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize data to JSON")?;
        utils::write(&self.path, json).await?;

        // Set restrictive permissions on Unix-like systems
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, Permissions::from_mode(0o600))
                .context("Failed to set file permissions")?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(super) fn data(&self) -> &F {
        &self.data
    }

    pub(super) fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub(super) fn into_data(self) -> F {
        self.data
    }
}

/// The persisted token pair.
///
/// ```json
/// {
///   "accessToken": "...",
///   "refreshToken": "..."
/// }
/// ```
#[derive(Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokenFile {
    #[serde(default)]
    pub(super) access_token: String,
    #[serde(default)]
    pub(super) refresh_token: String,
}

impl Debug for TokenFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenFile")
            .field("access_token", &utils::mask(&self.access_token))
            .field("refresh_token", &utils::mask(&self.refresh_token))
            .finish()
    }
}

/// The OAuth client credentials of the Smartsheet app, as copied into `.secrets/` by `init`.
///
/// ```json
/// {
///   "client_id": "...",
///   "client_secret": "..."
/// }
/// ```
#[derive(Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct SecretFile {
    #[serde(default)]
    pub(crate) client_id: String,
    #[serde(default)]
    pub(crate) client_secret: String,
}

impl Debug for SecretFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFile")
            .field("client_id", &utils::mask(&self.client_id))
            .field("client_secret", &utils::mask(&self.client_secret))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_token_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("token.json");
        let file = File::new(
            &path,
            TokenFile {
                access_token: "access-1".to_string(),
                refresh_token: "refresh-1".to_string(),
            },
        );
        file.save().await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&utils::read(&path).await.unwrap()).unwrap();
        assert_eq!("access-1", raw["accessToken"]);
        assert_eq!("refresh-1", raw["refreshToken"]);

        let loaded = File::<TokenFile>::load(&path).await.unwrap();
        assert_eq!(file.data(), loaded.data());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_save_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        File::new(&path, TokenFile::default()).save().await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
    }

    #[test]
    fn test_debug_masks_secrets() {
        let secret = SecretFile {
            client_id: "client-id-1234".to_string(),
            client_secret: "super-secret-9876".to_string(),
        };
        let debug = format!("{secret:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("****9876"));
    }
}
