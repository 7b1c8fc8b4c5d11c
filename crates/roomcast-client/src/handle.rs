//! The client's shared reference to its joined room.

use roomcast_rpc::{ChatError, RoomProxy};
use tokio::sync::{Mutex, MutexGuard};

/// Nickname plus the current room handle.
///
/// The handle is only replaced under the lock, and the send path reads it
/// under the same lock, so a send never observes a half-finished rejoin.
#[derive(Debug)]
pub struct ClientHandle {
    nickname: String,
    room: Mutex<Option<RoomProxy>>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            room: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Hold the handle's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, Option<RoomProxy>> {
        self.room.lock().await
    }

    pub async fn room(&self) -> Option<RoomProxy> {
        self.room.lock().await.clone()
    }

    pub async fn is_joined(&self) -> bool {
        self.room.lock().await.is_some()
    }

    pub async fn clear(&self) {
        self.room.lock().await.take();
    }

    /// Send `text` through the current room handle.
    ///
    /// The handle is read under the lock and the call is made after
    /// releasing it.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Connection`] when not joined, otherwise whatever
    /// the remote call fails with.
    pub async fn send_message(&self, text: &str) -> Result<(), ChatError> {
        let room = self
            .room()
            .await
            .ok_or_else(|| ChatError::Connection("not joined to a chat room".to_string()))?;
        room.send_message(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_handle_is_not_joined() {
        let handle = ClientHandle::new("alice");
        assert_eq!(handle.nickname(), "alice");
        assert!(!handle.is_joined().await);
        assert!(handle.room().await.is_none());
    }

    #[tokio::test]
    async fn test_send_without_room_is_transient_error() {
        let handle = ClientHandle::new("alice");
        let err = handle.send_message("hi").await.unwrap_err();
        assert!(matches!(err, ChatError::Connection(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let handle = ClientHandle::new("alice");
        handle.clear().await;
        handle.clear().await;
        assert!(!handle.is_joined().await);
    }
}
