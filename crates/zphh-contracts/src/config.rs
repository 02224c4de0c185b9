use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::chat::CommandKind;

pub const DEFAULT_API_BASE: &str = "https://chatglm.cn/chatglm";
pub const API_BASE_ENV: &str = "ZPHH_API_BASE";

/// Trigger strings for every command the plugin answers to.
///
/// Each one can be overridden from the `commands` object of the config file.
/// Keys that are missing, empty or not strings keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandTriggers {
    pub reset: String,
    pub draw: String,
    pub video: String,
    pub video_ref: String,
    pub help: String,
}

impl Default for CommandTriggers {
    fn default() -> Self {
        Self {
            reset: "z重置会话".to_string(),
            draw: "绘".to_string(),
            video: "z视频".to_string(),
            video_ref: "z图生视频".to_string(),
            help: "z帮助".to_string(),
        }
    }
}

impl CommandTriggers {
    pub fn from_value(value: &Value) -> Self {
        let mut triggers = Self::default();
        let Some(map) = value.as_object() else {
            if !value.is_null() {
                warn!(value = %value, "config `commands` is not an object; using default triggers");
            }
            return triggers;
        };
        let slots: [(CommandKind, &mut String); 5] = [
            (CommandKind::Reset, &mut triggers.reset),
            (CommandKind::Draw, &mut triggers.draw),
            (CommandKind::Video, &mut triggers.video),
            (CommandKind::VideoRef, &mut triggers.video_ref),
            (CommandKind::Help, &mut triggers.help),
        ];
        for (kind, slot) in slots {
            if let Some(trigger) = map
                .get(kind.config_key())
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
            {
                *slot = trigger.to_string();
            }
        }
        triggers
    }
}

impl<'de> Deserialize<'de> for CommandTriggers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub commands: CommandTriggers,
    pub api_base: String,
    pub journal_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub token_refresh_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub pending_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub draw_stream_timeout_secs: u64,
    pub request_retries: u32,
    pub retry_backoff_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            refresh_token: None,
            access_token: None,
            commands: CommandTriggers::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            journal_path: None,
            work_dir: None,
            token_refresh_interval_secs: 3600,
            poll_interval_secs: 5,
            poll_max_attempts: 180,
            pending_ttl_secs: 300,
            request_timeout_secs: 30,
            draw_stream_timeout_secs: 600,
            request_retries: 2,
            retry_backoff_ms: 1000,
            settle_delay_ms: 500,
        }
    }
}

impl PluginConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("config is not a valid JSON object")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
    }

    /// Loads the config file, degrading to an empty-token config when the
    /// file is missing or unreadable so the plugin can still start.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path.display(), "failed to load config: {err:#}");
                Self::default()
            }
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base) = non_empty_env(API_BASE_ENV) {
            self.api_base = base;
        }
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        if self.api_base.is_empty() {
            self.api_base = DEFAULT_API_BASE.to_string();
        }
        self
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Deadline for the whole draw stream, headers through the last frame.
    /// Never shorter than the per-request timeout.
    pub fn draw_stream_timeout(&self) -> Duration {
        Duration::from_secs(self.draw_stream_timeout_secs).max(self.request_timeout())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("zphh"))
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
