//! Typed stubs for the chat server's remote objects.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::ChatError;
use crate::protocol::{
    CHAT_SERVER_OBJECT, EnterParams, RoomRef, SendMessageParams, SendMessageResult, methods,
};

const SCHEME: &str = "tcp://";

/// Address of a remote object: `tcp://host:port/Object`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUri {
    host: String,
    object: String,
}

impl RemoteUri {
    #[must_use]
    pub fn new(host: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            object: object.into(),
        }
    }

    /// `host:port` the object is served from.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Same server, different object.
    #[must_use]
    pub fn with_object(&self, object: impl Into<String>) -> Self {
        Self::new(self.host.clone(), object)
    }
}

impl fmt::Display for RemoteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.host, self.object)
    }
}

impl FromStr for RemoteUri {
    type Err = ChatError;

    /// Accepts `tcp://host:port/Object` or `host:port/Object`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| ChatError::Configuration(format!("invalid remote URI '{s}': {why}"));

        let rest = match s.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
            None => s,
        };

        let (host, object) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing object name"))?;
        let object = object.trim_end_matches('/');

        let Some((name, port)) = host.rsplit_once(':') else {
            return Err(invalid("missing port"));
        };
        if name.is_empty() {
            return Err(invalid("missing host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(invalid("port is not a number"));
        }
        if object.is_empty() {
            return Err(invalid("missing object name"));
        }

        Ok(Self::new(host, object))
    }
}

/// Stub for the room entry point, `ChatServer.rem`.
#[derive(Debug, Clone)]
pub struct ChatServerProxy {
    channel: Channel,
    uri: RemoteUri,
    connection_name: Option<String>,
}

impl ChatServerProxy {
    #[must_use]
    pub fn new(channel: Channel, uri: RemoteUri) -> Self {
        Self {
            channel,
            uri,
            connection_name: None,
        }
    }

    /// Proxy whose calls authenticate with the named-connection session.
    #[must_use]
    pub fn named(channel: Channel, uri: RemoteUri, connection_name: impl Into<String>) -> Self {
        Self {
            channel,
            uri,
            connection_name: Some(connection_name.into()),
        }
    }

    /// Proxy for `{base}/ChatServer.rem`, where `base` is `tcp://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if `base` is not a valid address.
    pub fn from_base_uri(channel: Channel, base: &str) -> Result<Self, ChatError> {
        let uri = format!("{}/{CHAT_SERVER_OBJECT}", base.trim_end_matches('/')).parse()?;
        Ok(Self::new(channel, uri))
    }

    #[must_use]
    pub fn uri(&self) -> &RemoteUri {
        &self.uri
    }

    /// Diagnostic call; returns a fixed string identifying the server.
    ///
    /// # Errors
    ///
    /// See [`Channel::invoke`].
    pub async fn test(&self) -> Result<String, ChatError> {
        self.channel
            .invoke(&self.uri, methods::TEST, (), self.connection_name.as_deref())
            .await
    }

    /// Join the room as `nickname`, replacing any member of the same name.
    ///
    /// # Errors
    ///
    /// See [`Channel::invoke`].
    pub async fn enter_to_chat_room(&self, nickname: &str) -> Result<RoomProxy, ChatError> {
        let room: RoomRef = self
            .channel
            .invoke(
                &self.uri,
                methods::ENTER_TO_CHAT_ROOM,
                EnterParams {
                    nickname: nickname.to_string(),
                },
                self.connection_name.as_deref(),
            )
            .await?;

        info!(nickname, room = %room.room, "Entered chat room");
        Ok(RoomProxy {
            channel: self.channel.clone(),
            uri: self.uri.with_object(room.object),
            room: room.room,
            connection_name: self.connection_name.clone(),
        })
    }
}

/// Handle to a joined room. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoomProxy {
    channel: Channel,
    uri: RemoteUri,
    room: String,
    connection_name: Option<String>,
}

impl RoomProxy {
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    #[must_use]
    pub fn uri(&self) -> &RemoteUri {
        &self.uri
    }

    /// Broadcast `text` to every member, the sender included.
    ///
    /// # Errors
    ///
    /// See [`Channel::invoke`]. A server that no longer knows this member
    /// (for instance after a restart) answers with a transient
    /// [`ChatError::Connection`].
    pub async fn send_message(&self, text: &str) -> Result<(), ChatError> {
        let result: SendMessageResult = self
            .channel
            .invoke(
                &self.uri,
                methods::SEND_MESSAGE,
                SendMessageParams {
                    text: text.to_string(),
                },
                self.connection_name.as_deref(),
            )
            .await?;
        debug!(delivered = result.delivered, "Message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_uri() {
        let uri: RemoteUri = "tcp://localhost:8737/ChatServer.rem".parse().unwrap();
        assert_eq!(uri.host(), "localhost:8737");
        assert_eq!(uri.object(), "ChatServer.rem");
        assert_eq!(uri.to_string(), "tcp://localhost:8737/ChatServer.rem");
    }

    #[test]
    fn test_parse_without_scheme() {
        let uri: RemoteUri = "127.0.0.1:9000/ChatRoom.rem/".parse().unwrap();
        assert_eq!(uri.host(), "127.0.0.1:9000");
        assert_eq!(uri.object(), "ChatRoom.rem");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        for bad in [
            "http://localhost:8737/ChatServer.rem",
            "tcp://localhost/ChatServer.rem",
            "tcp://localhost:port/ChatServer.rem",
            "tcp://:8737/ChatServer.rem",
            "tcp://localhost:8737",
            "tcp://localhost:8737/",
        ] {
            let err = bad.parse::<RemoteUri>().unwrap_err();
            assert!(
                matches!(err, ChatError::Configuration(_)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_with_object_keeps_host() {
        let uri = RemoteUri::new("h:1", "ChatServer.rem").with_object("ChatRoom.rem");
        assert_eq!(uri.to_string(), "tcp://h:1/ChatRoom.rem");
    }

    #[test]
    fn test_from_base_uri_appends_entry_point() {
        let channel = Channel::new(
            crate::channel::ChannelConfig::default(),
            std::sync::Arc::new(crate::security::SecurityContext::new()),
        );
        let proxy = ChatServerProxy::from_base_uri(channel, "tcp://localhost:8737/").unwrap();
        assert_eq!(proxy.uri().object(), CHAT_SERVER_OBJECT);
        assert_eq!(proxy.uri().host(), "localhost:8737");
    }
}
