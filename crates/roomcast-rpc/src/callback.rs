//! Client callback for broadcast messages.

use serde::{Deserialize, Serialize};

use crate::protocol::ReceiveMessageParams;

/// One broadcast as seen by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender_nickname: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(text: impl Into<String>, sender_nickname: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_nickname: sender_nickname.into(),
        }
    }
}

impl From<ReceiveMessageParams> for ChatMessage {
    fn from(params: ReceiveMessageParams) -> Self {
        Self {
            text: params.message,
            sender_nickname: params.nickname,
        }
    }
}

impl From<&ChatMessage> for ReceiveMessageParams {
    fn from(message: &ChatMessage) -> Self {
        Self {
            message: message.text.clone(),
            nickname: message.sender_nickname.clone(),
        }
    }
}

/// Receives broadcasts on the channel's delivery task.
///
/// Implementations run synchronously and must not block for long; a slow
/// receiver delays later messages, not the sender.
pub trait MessageReceiver: Send + Sync + 'static {
    fn on_message(&self, message: &ChatMessage);
}
