//! Server configuration (`~/.config/roomcast/server.json`).

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use roomcast_rpc::{ServerKeyProvider, ServerKeyStore};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8737";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Security session clients must authenticate with. Unset accepts
    /// every client.
    #[serde(default)]
    pub session_name: Option<String>,

    #[serde(default)]
    pub target_name: Option<String>,

    #[serde(default)]
    pub shared_secret: Option<String>,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            session_name: None,
            target_name: None,
            shared_secret: None,
        }
    }
}

impl ServerConfig {
    /// `server.json` in the user's config directory, if one can be determined.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "roomcast").map(|dirs| dirs.config_dir().join("server.json"))
    }

    /// Load config from file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[must_use]
    pub fn key_store(&self) -> ServerKeyStore {
        let keys = ServerKeyStore::new();
        if let Some(session_name) = &self.session_name {
            keys.set_global_key(
                session_name.clone(),
                ServerKeyProvider {
                    target_name: self.target_name.clone(),
                    shared_secret: self.shared_secret.clone(),
                },
            );
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_load_nonexistent_returns_default() {
        let config = ServerConfig::load(Path::new("/nonexistent/roomcast/server.json")).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen, "127.0.0.1:8737");
    }

    #[test]
    fn test_config_load_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"listen": "0.0.0.0:9000", "sessionName": "SESSION", "sharedSecret": "s3cret"}}"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.session_name.as_deref(), Some("SESSION"));
        assert!(config.target_name.is_none());
    }

    #[test]
    fn test_config_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json}}").unwrap();
        assert!(ServerConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_key_store_follows_session_name() {
        assert!(ServerConfig::default().key_store().is_empty());

        let config = ServerConfig {
            session_name: Some("SESSION".into()),
            ..ServerConfig::default()
        };
        let keys = config.key_store();
        assert!(keys.accepts("SESSION"));
        assert!(!keys.accepts("OTHER"));
    }
}
