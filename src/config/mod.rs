//! Process-wide fabric configuration.
//!
//! ## Loading order
//!
//! 1. `HVAC_FABRIC_CONFIG` environment variable (path to a TOML file)
//! 2. `fabric.toml` in the current working directory
//! 3. Built-in defaults ([`defaults`])
//!
//! Connection strings and the cron shared secret always come from
//! environment variables, never the TOML file, so secrets never land
//! on disk as part of a checked-in config.
//!
//! ## Usage
//!
//! ```ignore
//! config::init(FabricConfig::load());
//! let ttl = config::get().batch_lock_ttl_secs;
//! ```

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static FABRIC_CONFIG: OnceLock<FabricConfig> = OnceLock::new();

/// Initialize the global fabric configuration. Must be called exactly once
/// before any call to [`get`].
pub fn init(config: FabricConfig) {
    if FABRIC_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get the global fabric configuration.
///
/// Panics if [`init`] has not been called — a missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static FabricConfig {
    FABRIC_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    FABRIC_CONFIG.get().is_some()
}

/// Tunable thresholds and timings, overridable via TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub batch_lock_ttl_secs: u64,
    pub leadlag_lock_ttl_secs: u64,
    pub leadlag_run_interval_secs: u64,
    pub job_status_ttl_secs: u64,
    pub equipment_list_cache_ttl_secs: u64,
    pub equipment_result_cache_ttl_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub default_max_staleness_secs: i64,
    pub read_window_minutes: i64,
    pub recent_command_window_minutes: i64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            batch_lock_ttl_secs: defaults::BATCH_LOCK_TTL_SECS,
            leadlag_lock_ttl_secs: defaults::LEADLAG_LOCK_TTL_SECS,
            leadlag_run_interval_secs: defaults::LEADLAG_RUN_INTERVAL_SECS,
            job_status_ttl_secs: defaults::JOB_STATUS_TTL_SECS,
            equipment_list_cache_ttl_secs: defaults::EQUIPMENT_LIST_CACHE_TTL_SECS,
            equipment_result_cache_ttl_secs: defaults::EQUIPMENT_RESULT_CACHE_TTL_SECS,
            max_retry_attempts: defaults::MAX_RETRY_ATTEMPTS,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            default_max_staleness_secs: defaults::DEFAULT_MAX_STALENESS_SECS,
            read_window_minutes: defaults::DEFAULT_READ_WINDOW_MINUTES,
            recent_command_window_minutes: defaults::RECENT_COMMAND_WINDOW_MINUTES,
        }
    }
}

impl FabricConfig {
    /// Load config per the order documented at module level.
    pub fn load() -> Self {
        let path = std::env::var("HVAC_FABRIC_CONFIG").unwrap_or_else(|_| "fabric.toml".to_string());

        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "Loaded fabric config");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to parse fabric config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!(path = %path, "No fabric config file found, using defaults");
                Self::default()
            }
        }
    }
}

/// Connection settings sourced from environment variables only.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub influxdb_url: String,
    pub influxdb_database: String,
    pub redis_url: String,
    pub server_action_secret_key: String,
}

impl ConnectionConfig {
    /// Read connection settings from the environment.
    ///
    /// # Errors
    /// Returns an error naming the first missing required variable.
    pub fn from_env() -> Result<Self, ConnectionConfigError> {
        Ok(Self {
            influxdb_url: require_env("INFLUXDB_URL")?,
            influxdb_database: require_env("INFLUXDB_DATABASE")?,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            server_action_secret_key: require_env("SERVER_ACTION_SECRET_KEY")?,
        })
    }
}

fn require_env(key: &str) -> Result<String, ConnectionConfigError> {
    std::env::var(key).map_err(|_| ConnectionConfigError::Missing(key.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
}
