//! Error kinds surfaced to chat clients.
//!
//! [`ChatError`] is what the proxies and the security context return;
//! transport-level [`ClientError`]s are folded into it so callers only need
//! to decide between "retry later" ([`ChatError::is_transient`]) and "give up".

use crate::connection::ClientError;
use crate::protocol::{
    AUTHENTICATION_FAILED, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, NOT_A_MEMBER,
    NOT_AUTHENTICATED, OBJECT_NOT_FOUND, PARSE_ERROR,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// The server is unreachable or the connection dropped mid-call.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single member could not be reached during a broadcast.
    #[error("Delivery to '{nickname}' failed: {reason}")]
    Delivery { nickname: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ChatError {
    /// Whether reconnecting and retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Connection(_) | ChatError::Delivery { .. })
    }
}

impl From<ClientError> for ChatError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(e) => ChatError::Connection(e.to_string()),
            ClientError::Codec(e) => ChatError::Connection(e.to_string()),
            ClientError::ConnectionClosed => ChatError::Connection("connection closed".into()),
            ClientError::Timeout => ChatError::Connection("request timed out".into()),
            ClientError::Json(e) => ChatError::Protocol(e.to_string()),
            ClientError::UnexpectedResponse => {
                ChatError::Protocol("unexpected response".to_string())
            }
            ClientError::Rpc { code, message } => match code {
                AUTHENTICATION_FAILED | NOT_AUTHENTICATED => ChatError::Authentication(message),
                // The server forgot us (e.g. it restarted); rejoining fixes it.
                NOT_A_MEMBER => ChatError::Connection(message),
                PARSE_ERROR | INVALID_REQUEST | METHOD_NOT_FOUND | INVALID_PARAMS
                | OBJECT_NOT_FOUND => ChatError::Protocol(message),
                _ => ChatError::Protocol(format!("{code}: {message}")),
            },
        }
    }
}
