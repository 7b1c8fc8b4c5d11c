//! Client configuration (`~/.config/roomcast/client.json`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use roomcast_rpc::{ChannelConfig, ChatError, Credentials};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base address of the chat server; `/ChatServer.rem` is appended.
    #[serde(default = "default_remote_host_uri")]
    pub remote_host_uri: String,

    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default = "default_target_name")]
    pub target_name: Option<String>,

    /// Explicit credentials; without them the process user is presented.
    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

fn default_remote_host_uri() -> String {
    "tcp://127.0.0.1:8737".to_string()
}
fn default_session_name() -> String {
    "/TEST/SSPI1".to_string()
}
#[allow(clippy::unnecessary_wraps)] // serde default for an Option field
fn default_target_name() -> Option<String> {
    Some("localhost".to_string())
}
fn default_retry_delay() -> u64 {
    3000
}
fn default_reconnect_interval() -> u64 {
    3000
}
fn default_call_timeout() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_host_uri: default_remote_host_uri(),
            session_name: default_session_name(),
            target_name: default_target_name(),
            credentials: None,
            retry_delay_ms: default_retry_delay(),
            max_attempts: None,
            reconnect_interval_ms: default_reconnect_interval(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl ClientConfig {
    /// `client.json` in the user's config directory, if one can be determined.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "roomcast").map(|dirs| dirs.config_dir().join("client.json"))
    }

    /// Load config from file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if the file cannot be read or
    /// contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Configuration(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ChatError::Configuration(format!("{}: {e}", path.display())))
    }

    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            auto_reconnect: true,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.retry_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.remote_host_uri, "tcp://127.0.0.1:8737");
        assert_eq!(config.session_name, "/TEST/SSPI1");
        assert_eq!(config.target_name.as_deref(), Some("localhost"));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(
            config.channel_config().call_timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_config_load_nonexistent_returns_default() {
        let config = ClientConfig::load(Path::new("/nonexistent/roomcast/client.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_config_load_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"remoteHostUri": "tcp://chat.example:9000", "retryDelayMs": 500, "maxAttempts": 4,
                "credentials": {{"user": "alice", "secret": "s3cret"}}}}"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.remote_host_uri, "tcp://chat.example:9000");
        assert_eq!(config.session_name, "/TEST/SSPI1");
        let policy = config.retry_policy();
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(
            config.credentials.unwrap().user.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_config_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json}}").unwrap();
        let err = ClientConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }
}
