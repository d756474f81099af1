use std::sync::Arc;
use tracing::info;

use crate::models::{ChannelId, Mode, User, new_session_id};
use crate::registry::SessionStore;

/// Slash commands understood by the bot. Anything else is a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    New,
    Chat,
    Pro,
}

impl Command {
    /// Parse the first word of `text`, accepting a `/cmd@botname` suffix.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);
        match name {
            "start" => Some(Command::Start),
            "new" => Some(Command::New),
            "chat" => Some(Command::Chat),
            "pro" => Some(Command::Pro),
            _ => None,
        }
    }
}

/// Session and mode changes requested by the user.
///
/// Both operations pick a pod again and start a fresh session. Status is
/// left alone: a job already running keeps the pod and session it captured,
/// the new affinity applies from the next prompt.
pub struct SessionController {
    store: Arc<SessionStore>,
}

impl SessionController {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// `/new`: same mode, new pod pick, new session.
    pub fn reset_session(&self, channel_id: ChannelId) -> Option<User> {
        let user = self.store.update(channel_id, |user| {
            user.server = self.store.pods().pick_pod(user.mode);
            user.session_id = new_session_id();
            user.clone()
        })?;
        info!(user = %channel_id, pod = %user.server, "Session reset");
        Some(user)
    }

    /// `/chat` and `/pro`.
    pub fn switch_mode(&self, channel_id: ChannelId, mode: Mode) -> Option<User> {
        let user = self.store.update(channel_id, |user| {
            user.mode = mode;
            user.server = self.store.pods().pick_pod(mode);
            user.session_id = new_session_id();
            user.clone()
        })?;
        info!(user = %channel_id, mode = %mode, pod = %user.server, "Mode switched");
        Some(user)
    }
}
