//! Configuration resolution for livetail.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`$XDG_CONFIG_HOME/livetail/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`LIVETAIL_*`)
//! 5. CLI arguments (highest priority, applied by each binary)
//!
//! Files may be partial; keys they omit keep the value from the layer below.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Shared secret used by the server and producer when none is configured.
pub const DEV_SHARED_SECRET: &str = "dev-secret-change-me";

/// Complete livetail configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub producer: ProducerConfig,
    pub subscriber: SubscriberConfig,
}

/// Ingestion and broadcast server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub database_path: Option<PathBuf>,
    /// Shared secret required on every write endpoint.
    pub shared_secret: Option<String>,
    /// Number of sessions kept; older ones are pruned when a new one starts.
    pub retention: u32,
    /// Active sessions without chunk activity for this long are failed.
    pub stale_session_secs: u64,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
            database_path: None,
            shared_secret: None,
            retention: 20,
            stale_session_secs: 60 * 60,
            log_level: "info".to_string(),
        }
    }
}

/// Per-connection broadcast loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_secs: u64,
    pub countdown_check_secs: u64,
    /// Hard bound on one connection's lifetime.
    pub max_duration_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            heartbeat_secs: 30,
            countdown_check_secs: 5,
            max_duration_secs: 5 * 60,
        }
    }
}

impl StreamConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub const fn countdown_interval(&self) -> Duration {
        Duration::from_secs(self.countdown_check_secs)
    }

    pub const fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Producer side: buffering and the ingestion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub server_url: String,
    pub shared_secret: Option<String>,
    pub flush_interval_ms: u64,
    pub flush_threshold_bytes: usize,
    /// Flushed chunks allowed to wait for the sink before new ones are dropped.
    pub max_pending_chunks: usize,
    /// Extra attempts for a push that failed in transport or with a 5xx.
    pub push_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            shared_secret: None,
            flush_interval_ms: 100,
            flush_threshold_bytes: 4096,
            max_pending_chunks: 1024,
            push_retries: 2,
            request_timeout_secs: 10,
        }
    }
}

/// Subscriber side: reconnect timing and transcript size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub server_url: String,
    pub error_reconnect_ms: u64,
    pub timeout_reconnect_ms: u64,
    pub max_transcript_lines: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            error_reconnect_ms: 5_000,
            timeout_reconnect_ms: 1_000,
            max_transcript_lines: 10_000,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_values(&mut merged, load_config_value(&global_path)?);
    }

    if let Some(path) = explicit {
        merge_values(&mut merged, load_config_value(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("livetail").join("settings.json"))
}

fn load_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay `overlay` onto `base`, recursing into objects.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("LIVETAIL_ADDR") {
        config.server.addr = val;
    }
    if let Some(val) = lookup("LIVETAIL_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("LIVETAIL_SECRET") {
        config.server.shared_secret = Some(val.clone());
        config.producer.shared_secret = Some(val);
    }
    if let Some(n) = lookup("LIVETAIL_RETENTION").and_then(|v| v.parse().ok()) {
        config.server.retention = n;
    }
    if let Some(val) = lookup("LIVETAIL_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(val) = lookup("LIVETAIL_SERVER_URL") {
        config.producer.server_url.clone_from(&val);
        config.subscriber.server_url = val;
    }
    if let Some(n) = lookup("LIVETAIL_MAX_STREAM_SECS").and_then(|v| v.parse().ok()) {
        config.stream.max_duration_secs = n;
    }
    if let Some(n) = lookup("LIVETAIL_PUSH_RETRIES").and_then(|v| v.parse().ok()) {
        config.producer.push_retries = n;
    }
}
