//! Error types for the chat server.

use roomcast_rpc::protocol::RpcError;
use roomcast_rpc::{ChatError, CodecError};

/// Errors that can occur in the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A method was called before the handshake.
    #[error("Handshake required")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller does not (or no longer) own a room membership.
    #[error("Not a member of the chat room")]
    NotAMember,

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Delivery to '{nickname}' failed: {reason}")]
    Delivery { nickname: String, reason: String },
}

impl From<ServerError> for RpcError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Io(e) => RpcError::internal_error(e.to_string()),
            ServerError::Json(e) => RpcError::internal_error(e.to_string()),
            ServerError::Codec(e) => RpcError::internal_error(e.to_string()),
            ServerError::NotAuthenticated => RpcError::not_authenticated(),
            ServerError::Authentication(reason) => RpcError::authentication_failed(reason),
            ServerError::NotAMember => RpcError::not_a_member(),
            ServerError::ObjectNotFound(object) => RpcError::object_not_found(&object),
            ServerError::InvalidParams(msg) => RpcError::invalid_params(msg),
            ServerError::MethodNotFound(name) => RpcError::method_not_found(&name),
            err @ ServerError::Delivery { .. } => RpcError::internal_error(err.to_string()),
        }
    }
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Authentication(reason) => ServerError::Authentication(reason),
            ChatError::Delivery { nickname, reason } => ServerError::Delivery { nickname, reason },
            ChatError::Protocol(msg) | ChatError::Configuration(msg) => {
                ServerError::InvalidParams(msg)
            }
            ChatError::Connection(msg) => ServerError::Io(std::io::Error::other(msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
