//! roomcast chat server library.
//!
//! Hosts the shared chat room behind a TCP listener: clients authenticate
//! with a security handshake, enter the room under a nickname and broadcast
//! messages that are pushed back to every member.

pub mod config;
pub mod error;
pub(crate) mod handlers;
pub mod room;
pub mod server;
pub mod session;

pub use config::{DEFAULT_LISTEN, ServerConfig};
pub use error::{Result, ServerError};
pub use handlers::TEST_REPLY;
pub use room::{ChatRoom, DeliveryEndpoint};
pub use server::{ChatServer, ServerState};
pub use session::{ConnectionSession, SessionId};
