//! Configuration for the chat client.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Environment variable for the backend base URL.
pub const API_URL_ENV: &str = "EMPATECH_API_URL";
/// Environment variable for the bearer token.
pub const API_TOKEN_ENV: &str = "EMPATECH_API_TOKEN";
/// Environment variable enabling the conversation cache at a path.
pub const CACHE_PATH_ENV: &str = "EMPATECH_CACHE_PATH";

/// Top-level configuration for a chat tab.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Timer thresholds of the reconciliation heuristics.
    pub timing: TimingConfig,
    /// Remote backend settings.
    pub backend: BackendConfig,
    /// Cross-tab channel settings.
    pub sync: SyncConfig,
    /// Local conversation cache settings.
    pub cache: CacheConfig,
}

impl ChatConfig {
    /// Defaults overlaid with `EMPATECH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.backend.base_url = url;
        }
        config.backend.api_token = std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
            config.cache.enabled = true;
            config.cache.sqlite_path = PathBuf::from(path);
        }
        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        let timers = [
            ("timing.promotion_delay_ms", self.timing.promotion_delay_ms),
            ("timing.appear_delay_ms", self.timing.appear_delay_ms),
            ("timing.optimistic_window_ms", self.timing.optimistic_window_ms),
            ("timing.task_max_age_ms", self.timing.task_max_age_ms),
            ("timing.cleanup_throttle_ms", self.timing.cleanup_throttle_ms),
            ("timing.sweep_interval_ms", self.timing.sweep_interval_ms),
            ("backend.request_timeout_secs", self.backend.request_timeout_secs),
            ("backend.stream_idle_timeout_secs", self.backend.stream_idle_timeout_secs),
            ("backend.connect_timeout_secs", self.backend.connect_timeout_secs),
        ];
        for (name, value) in timers {
            if value == 0 {
                return Err(ChatError::InvalidConfig(format!("{name} must be > 0")));
            }
        }

        if self.sync.channel_capacity == 0 {
            return Err(ChatError::InvalidConfig(
                "sync.channel_capacity must be > 0".to_string(),
            ));
        }

        if self.cache.detail_capacity == 0 {
            return Err(ChatError::InvalidConfig(
                "cache.detail_capacity must be > 0".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.table.is_empty() {
            return Err(ChatError::InvalidConfig(
                "cache.table must not be empty".to_string(),
            ));
        }

        Url::parse(&self.backend.base_url)?;

        Ok(())
    }
}

/// Thresholds standing in for a request-correlation handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before an unresolved stream becomes a visible task.
    pub promotion_delay_ms: u64,
    /// How long the newest assistant message stays hidden after completion.
    pub appear_delay_ms: u64,
    /// Matching and expiry window for optimistic messages.
    pub optimistic_window_ms: u64,
    /// Tasks older than this are purged by the sweep.
    pub task_max_age_ms: u64,
    /// Minimum spacing between optimistic cleanups.
    pub cleanup_throttle_ms: u64,
    /// Interval of the maintenance sweep.
    pub sweep_interval_ms: u64,
}

impl TimingConfig {
    /// Promotion delay as a tokio-friendly duration.
    #[must_use]
    pub const fn promotion_delay(&self) -> Duration {
        Duration::from_millis(self.promotion_delay_ms)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Appear delay as a chrono delta.
    #[must_use]
    pub fn appear_delay(&self) -> TimeDelta {
        millis_delta(self.appear_delay_ms)
    }

    /// Optimistic window as a chrono delta.
    #[must_use]
    pub fn optimistic_window(&self) -> TimeDelta {
        millis_delta(self.optimistic_window_ms)
    }

    /// Task max age as a chrono delta.
    #[must_use]
    pub fn task_max_age(&self) -> TimeDelta {
        millis_delta(self.task_max_age_ms)
    }

    /// Cleanup throttle as a chrono delta.
    #[must_use]
    pub fn cleanup_throttle(&self) -> TimeDelta {
        millis_delta(self.cleanup_throttle_ms)
    }
}

fn millis_delta(ms: u64) -> TimeDelta {
    TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000))
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            promotion_delay_ms: 10_000,
            appear_delay_ms: 1_000,
            optimistic_window_ms: 30_000,
            task_max_age_ms: 5 * 60 * 1_000,
            cleanup_throttle_ms: 1_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Remote backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the chat API.
    pub base_url: String,
    /// Optional bearer token.
    pub api_token: Option<String>,
    /// Whole-request timeout for calls that return a complete body.
    pub request_timeout_secs: u64,
    /// Longest silence tolerated between chunks of a streamed reply.
    ///
    /// Streamed replies have no overall deadline.
    pub stream_idle_timeout_secs: u64,
    /// Connection timeout.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            api_token: None,
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 90,
            connect_timeout_secs: 10,
        }
    }
}

/// Cross-tab channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Buffered events per receiver before it lags.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Local soft-cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the `SQLite` conversation cache is used.
    pub enabled: bool,
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub table: String,
    /// Conversation details kept in memory (LRU).
    pub detail_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sqlite_path: PathBuf::from("empatech_chat.sqlite"),
            table: "chat_conversations".to_string(),
            detail_capacity: 64,
        }
    }
}
