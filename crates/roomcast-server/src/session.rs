//! Per-connection session state.

use std::net::SocketAddr;

use roomcast_rpc::{Identity, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One accepted connection: who it authenticated as and which member it is.
#[derive(Debug)]
pub struct ConnectionSession {
    pub id: SessionId,
    pub peer: SocketAddr,
    /// Set by a successful handshake.
    pub identity: Option<Identity>,
    /// Set by `EnterToChatRoom`; the membership may since have been taken over.
    pub nickname: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(peer: SocketAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: SessionId::new(),
            peer,
            identity: None,
            nickname: None,
            sender,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Outgoing queue of this connection, shared with the room on enter.
    #[must_use]
    pub fn sender(&self) -> &mpsc::UnboundedSender<Message> {
        &self.sender
    }

    #[must_use]
    pub fn principal(&self) -> &str {
        self.identity
            .as_ref()
            .map_or("anonymous", |identity| identity.principal_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_eq!(SessionId::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_new_session_is_unauthenticated() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(peer(), tx);
        assert!(!session.is_authenticated());
        assert!(session.nickname.is_none());
        assert_eq!(session.principal(), "anonymous");
    }

    #[test]
    fn test_principal_comes_from_identity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(peer(), tx);
        session.identity = Some(Identity {
            principal_name: "alice".into(),
            authentication_method: roomcast_rpc::AuthenticationMethod::ProcessIdentity,
        });
        assert!(session.is_authenticated());
        assert_eq!(session.principal(), "alice");
    }
}
