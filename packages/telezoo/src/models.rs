use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identity of a user on the messaging channel (the Telegram user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service tier, each with its own pod pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    #[serde(alias = "")]
    Chat,
    Pro,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Chat, Mode::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Pro => "pro",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    #[serde(alias = "")]
    Idle,
    Processing,
}

impl UserStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, UserStatus::Idle)
    }
}

/// A known user and their affinity state.
///
/// Persisted one per line in `telezoo.db`; the serde attributes define that
/// format, including the `tgid` key written by older deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque id in an external system, unused by the relay itself
    #[serde(
        rename = "id",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,

    #[serde(rename = "channelId", alias = "tgid")]
    pub channel_id: ChannelId,

    #[serde(default)]
    pub mode: Mode,

    /// Empty means the pod lost the session and a new one is minted before
    /// the next dispatch
    #[serde(rename = "session", default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    #[serde(default, skip_serializing_if = "UserStatus::is_idle")]
    pub status: UserStatus,

    /// Sticky pod endpoint, always a member of the pool for `mode`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
}

impl User {
    /// A first-contact user: idle, with a fresh session on `server`.
    pub fn new(channel_id: ChannelId, username: Option<String>, mode: Mode, server: String) -> Self {
        Self {
            external_id: None,
            username: username.filter(|u| !u.is_empty()),
            channel_id,
            mode,
            session_id: new_session_id(),
            status: UserStatus::Idle,
            server,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.status == UserStatus::Processing
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
