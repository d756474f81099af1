use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RelayError;
use crate::models::Mode;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   config.toml:     [dispatch]
//                    poll_interval_ms = 500
//
//   env var:         TELEZOO_DISPATCH__POLL_INTERVAL_MS=500   (double underscore = nesting)
//
// The variables of older deployments are still honoured:
//
//   CHATZOO=http://10.0.0.1:15415,http://10.0.0.2:15415   ->  pods.chat
//   PROZOO=http://10.0.0.3:15415                          ->  pods.pro
//   TELEGRAM_TOKEN=...                                    ->  telegram.token

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub telegram: TelegramFileConfig,
    #[serde(default)]
    pub pods: PodsFileConfig,
    #[serde(default)]
    pub dispatch: DispatchFileConfig,
    #[serde(default)]
    pub admission: AdmissionFileConfig,
    #[serde(default)]
    pub storage: StorageFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub messages: Messages,
}

/// How outbound text is marked up for Telegram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseModeSetting {
    /// Legacy Telegram Markdown. `\*` hides a stray asterisk and `*` pairs
    /// render bold, but `\-` is not an escape here and shows with its
    /// backslash. `markdownv2` reads `\-` correctly yet rejects most replies,
    /// which leave `.`, `!` or `(` unescaped, and every such tick is resent
    /// as plain text.
    #[default]
    Markdown,
    MarkdownV2,
    None,
}

/// `[telegram]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TelegramFileConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub parse_mode: ParseModeSetting,
}

/// `[pods]`, each pool is a list or a comma separated string.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PodsFileConfig {
    #[serde(default, deserialize_with = "list_or_csv")]
    pub chat: Vec<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub pro: Vec<String>,
}

impl PodsFileConfig {
    pub fn pools(&self) -> HashMap<Mode, Vec<String>> {
        HashMap::from([(Mode::Chat, self.chat.clone()), (Mode::Pro, self.pro.clone())])
    }
}

/// `[dispatch]` submit/poll timing and failure budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchFileConfig {
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_failure_budget")]
    pub max_transport_failures: u32,
    #[serde(default = "default_failure_budget")]
    pub max_decode_failures: u32,
    #[serde(default = "default_failure_budget")]
    pub max_channel_failures: u32,
    /// 0 = no deadline
    #[serde(default)]
    pub job_timeout_secs: u64,
}

impl Default for DispatchFileConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: default_submit_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_transport_failures: default_failure_budget(),
            max_decode_failures: default_failure_budget(),
            max_channel_failures: default_failure_budget(),
            job_timeout_secs: 0,
        }
    }
}

/// `[admission]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionFileConfig {
    #[serde(default = "default_admission_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 0 = wait as long as it takes
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for AdmissionFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_admission_poll_interval_ms(),
            timeout_secs: 0,
        }
    }
}

/// `[storage]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageFileConfig {
    /// 0 = only checkpoint on shutdown
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

impl Default for StorageFileConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

/// `[server]`, the optional status endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// `[messages]`, every notice the bot sends on its own behalf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub hello: String,
    pub new_session: String,
    pub chat_mode: String,
    pub pro_mode: String,
    pub transport_failure: String,
    pub session_lost: String,
    pub busy: String,
    pub empty_reply: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            hello: "Hi! Looks like this is our first chat :)\n\n\
                    I understand many languages and can talk about anything, just write to me.\n\n\
                    If you need something more serious, switch me to PRO mode.\n\n\
                    Commands worth remembering:\n\n\
                    /new - start a new dialog [ forget the past ]\n\
                    /chat - casual talk [ answers fast ]\n\
                    /pro - full intelligence [ will be slow ]\n"
                .to_string(),
            new_session: "Starting a new session...".to_string(),
            chat_mode: "Switching to chat mode...".to_string(),
            pro_mode: "Switching to full power...".to_string(),
            transport_failure: "Connection problems, please try again...".to_string(),
            session_lost: "The session was lost, your next message starts a new one.".to_string(),
            busy: "Still working on your previous message, please try again later.".to_string(),
            empty_reply: "No answer this time, please rephrase and try again.".to_string(),
        }
    }
}

fn default_submit_timeout_ms() -> u64 {
    5000
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    300
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_failure_budget() -> u32 {
    10
}
fn default_admission_poll_interval_ms() -> u64 {
    200
}
fn default_checkpoint_interval_secs() -> u64 {
    300
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    9090
}

fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(list) => list,
        ListOrCsv::Csv(csv) => split_csv(&csv),
    })
}

fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build a figment that layers: defaults → config.toml → legacy env vars → TELEZOO_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TELEZOO_SERVER__ENABLED=true`  →  `server.enabled = true`
///   `TELEZOO_ADMISSION__TIMEOUT_SECS=60`  →  `admission.timeout_secs = 60`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    load_config_with(data_dir, |var| std::env::var(var).ok())
}

fn load_config_with(data_dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")));

    for (var, key) in [("CHATZOO", "pods.chat"), ("PROZOO", "pods.pro")] {
        if let Some(value) = lookup(var) {
            let pods = split_csv(&value);
            if !pods.is_empty() {
                figment = figment.merge(Serialized::default(key, pods));
            }
        }
    }
    if let Some(token) = lookup("TELEGRAM_TOKEN").filter(|t| !t.trim().is_empty()) {
        figment = figment.merge(Serialized::default("telegram.token", token.trim().to_string()));
    }

    figment.merge(Env::prefixed("TELEZOO_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub token: String,
    pub parse_mode: ParseModeSetting,
}

impl TelegramConfig {
    pub fn from_file(fc: &TelegramFileConfig) -> Result<Self, RelayError> {
        let token = fc
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                RelayError::Configuration(
                    "telegram token is not set (TELEGRAM_TOKEN or telegram.token)".to_string(),
                )
            })?;
        Ok(Self {
            token: token.to_string(),
            parse_mode: fc.parse_mode,
        })
    }
}

/// Job dispatch timing (runtime view).
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub submit_timeout: Duration,
    pub poll_timeout: Duration,
    /// Pause between an accepted submit and the first poll
    pub settle_delay: Duration,
    /// Pause between successful polls
    pub poll_interval: Duration,
    /// Pause after a failed poll or delivery
    pub retry_delay: Duration,
    pub max_transport_failures: u32,
    pub max_decode_failures: u32,
    pub max_channel_failures: u32,
    pub job_timeout: Option<Duration>,
}

impl DispatchConfig {
    pub fn from_file(fc: &DispatchFileConfig) -> Self {
        Self {
            submit_timeout: Duration::from_millis(fc.submit_timeout_ms),
            poll_timeout: Duration::from_millis(fc.poll_timeout_ms),
            settle_delay: Duration::from_millis(fc.settle_delay_ms),
            poll_interval: Duration::from_millis(fc.poll_interval_ms),
            retry_delay: Duration::from_millis(fc.retry_delay_ms),
            max_transport_failures: fc.max_transport_failures,
            max_decode_failures: fc.max_decode_failures,
            max_channel_failures: fc.max_channel_failures,
            job_timeout: secs_or_none(fc.job_timeout_secs),
        }
    }

    pub fn pod_client_config(&self) -> pod_client::PodClientConfig {
        pod_client::PodClientConfig {
            submit_timeout: self.submit_timeout,
            poll_timeout: self.poll_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl AdmissionConfig {
    pub fn from_file(fc: &AdmissionFileConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(fc.poll_interval_ms.max(1)),
            timeout: secs_or_none(fc.timeout_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub checkpoint_interval: Option<Duration>,
}

impl StorageConfig {
    pub fn from_file(fc: &StorageFileConfig) -> Self {
        Self {
            checkpoint_interval: secs_or_none(fc.checkpoint_interval_secs),
        }
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct TelezooConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl TelezooConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".telezoo"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        let db_path = data_dir.join("telezoo.db");

        Ok(Self {
            data_dir,
            db_path,
            logs_dir,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("telezoo.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn dotenv_path(&self) -> PathBuf {
        self.data_dir.join(".env")
    }
}
