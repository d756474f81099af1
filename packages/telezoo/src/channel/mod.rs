//! Messaging channel seam.
//!
//! The relay only ever sends a message and later edits it in place; anything
//! able to do both can carry replies. [`telegram`] is the shipped adapter.

pub mod telegram;

use async_trait::async_trait;

use crate::models::ChannelId;

/// A message already delivered to a recipient, editable later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub recipient: ChannelId,
    pub message_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to send message to {recipient}: {reason}")]
    Send { recipient: ChannelId, reason: String },

    #[error("failed to edit message {message_id} for {recipient}: {reason}")]
    Edit {
        recipient: ChannelId,
        message_id: String,
        reason: String,
    },
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, recipient: ChannelId, text: &str) -> Result<MessageHandle, ChannelError>;

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;

    /// Longest text a single message may carry, in UTF-16 code units.
    /// `None` means unlimited.
    fn max_text_len(&self) -> Option<usize> {
        None
    }
}

/// A text message received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub username: Option<String>,
    pub text: String,
}
