//! The shared chat room: nickname to delivery endpoint.
//!
//! Membership changes are serialized by one mutex. Broadcasts take a snapshot
//! under the lock and deliver outside it, so a slow or dead member never
//! blocks `enter`/`detach` and never stops delivery to the others.

use std::collections::HashMap;

use roomcast_rpc::protocol::{Notification, ReceiveMessageParams, RoomRef, methods};
use roomcast_rpc::{CHAT_ROOM_OBJECT, ChatMessage, Message};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::session::SessionId;

pub const DEFAULT_ROOM: &str = "lobby";

/// Where a member's broadcasts go: the owning connection's outgoing queue.
#[derive(Debug, Clone)]
pub struct DeliveryEndpoint {
    session_id: SessionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl DeliveryEndpoint {
    #[must_use]
    pub fn new(session_id: SessionId, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { session_id, sender }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn deliver(&self, nickname: &str, message: &ChatMessage) -> Result<()> {
        let params = serde_json::to_value(ReceiveMessageParams::from(message))?;
        let notification = Notification::new(methods::RECEIVE_MESSAGE, Some(params));
        self.sender
            .send(Message::Notification(notification))
            .map_err(|_| ServerError::Delivery {
                nickname: nickname.to_string(),
                reason: "connection closed".to_string(),
            })
    }
}

#[derive(Debug)]
pub struct ChatRoom {
    name: String,
    members: Mutex<HashMap<String, DeliveryEndpoint>>,
}

impl Default for ChatRoom {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

impl ChatRoom {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `nickname`, replacing any existing member of that name.
    ///
    /// The displaced connection is not told; it simply stops receiving.
    pub async fn enter(&self, nickname: &str, endpoint: DeliveryEndpoint) -> RoomRef {
        let count = {
            let mut members = self.members.lock().await;
            if let Some(previous) = members.insert(nickname.to_string(), endpoint) {
                debug!(
                    nickname,
                    displaced = %previous.session_id,
                    "Nickname taken over by a new connection"
                );
            }
            members.len()
        };
        info!(nickname, members = count, "Member entered the room");

        RoomRef {
            object: CHAT_ROOM_OBJECT.to_string(),
            room: self.name.clone(),
        }
    }

    /// Broadcast `text` from `sender` to every member, the sender included.
    ///
    /// Returns how many members it reached. Members whose delivery fails are
    /// detached afterwards.
    pub async fn send_message(&self, sender: &str, text: &str) -> usize {
        let snapshot: Vec<(String, DeliveryEndpoint)> = {
            let members = self.members.lock().await;
            members
                .iter()
                .map(|(nickname, endpoint)| (nickname.clone(), endpoint.clone()))
                .collect()
        };

        let message = ChatMessage::new(text, sender);
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (nickname, endpoint) in snapshot {
            match endpoint.deliver(&nickname, &message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("{e}");
                    failed.push((nickname, endpoint.session_id));
                }
            }
        }

        for (nickname, session_id) in failed {
            self.detach_endpoint(&nickname, &session_id).await;
        }

        debug!(sender, delivered, "Broadcast finished");
        delivered
    }

    /// Remove `nickname`. Returns whether it was a member.
    pub async fn detach(&self, nickname: &str) -> bool {
        let removed = self.members.lock().await.remove(nickname).is_some();
        if removed {
            info!(nickname, "Member left the room");
        }
        removed
    }

    /// Remove `nickname` only if it still belongs to `session_id`.
    pub async fn detach_endpoint(&self, nickname: &str, session_id: &SessionId) -> bool {
        let mut members = self.members.lock().await;
        let owned = members
            .get(nickname)
            .is_some_and(|endpoint| endpoint.session_id == *session_id);
        if owned {
            members.remove(nickname);
            info!(nickname, "Member left the room");
        }
        owned
    }

    /// Whether `nickname` is currently held by `session_id`.
    pub async fn is_member(&self, nickname: &str, session_id: &SessionId) -> bool {
        self.members
            .lock()
            .await
            .get(nickname)
            .is_some_and(|endpoint| endpoint.session_id == *session_id)
    }

    /// Current nicknames, sorted.
    pub async fn members(&self) -> Vec<String> {
        let mut nicknames: Vec<String> = self.members.lock().await.keys().cloned().collect();
        nicknames.sort();
        nicknames
    }
}
