//! Remote call layer for roomcast.
//!
//! This crate provides everything the chat client and server share: the
//! JSON-RPC 2.0 protocol types, the length-prefixed TCP codec, the client
//! [`Channel`] with its typed proxies, the lifecycle event feed, and the
//! named security sessions used to authenticate connections.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 messages and the chat method vocabulary
//! - [`transport`]: Length-prefixed codec for message framing
//! - [`connection`]: One persistent connection with request/response matching
//! - [`channel`]: Per-host connection management, restart detection, callbacks
//! - [`proxy`]: `ChatServerProxy` and `RoomProxy` stubs
//! - [`events`]: Broadcast feed of connection lifecycle events
//! - [`security`]: Client security context and server key store
//! - [`error`]: `ChatError`, the error taxonomy callers see
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use roomcast_rpc::{Channel, ChannelConfig, ChatServerProxy, SecurityContext};
//!
//! # async fn example() -> Result<(), roomcast_rpc::ChatError> {
//! let channel = Channel::new(ChannelConfig::default(), Arc::new(SecurityContext::new()));
//! let server = ChatServerProxy::from_base_uri(channel, "tcp://localhost:8737")?;
//!
//! println!("{}", server.test().await?);
//! let room = server.enter_to_chat_room("alice").await?;
//! room.send_message("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod channel;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod proxy;
pub mod security;
pub mod transport;

pub use callback::{ChatMessage, MessageReceiver};
pub use channel::{Channel, ChannelConfig};
pub use connection::{ClientError, RpcConnection};
pub use error::ChatError;
pub use events::{ChannelEvent, EventListener, EventSource};
pub use protocol::{
    AUTHENTICATION_FAILED, CHAT_ROOM_OBJECT, CHAT_SERVER_OBJECT, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, Message, NOT_A_MEMBER, NOT_AUTHENTICATED,
    Notification, OBJECT_NOT_FOUND, PARSE_ERROR, Request, RequestId, Response, RpcError, methods,
};
pub use proxy::{ChatServerProxy, RemoteUri, RoomProxy};
pub use security::{
    AuthenticationMethod, ConnectionClass, Credentials, Identity, KeyProvider, SecurityContext,
    SecuritySession, ServerKeyProvider, ServerKeyStore, SessionAttributes, SessionTimeout,
};
pub use transport::{CodecError, MessageCodec};
