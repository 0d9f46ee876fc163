//! Configuration Management Module
//!
//! Loads all application configuration from environment variables:
//! - HTTP server bind address and CORS origins
//! - Upstream reservation API endpoint and timeout
//! - Request scheduler tuning (concurrency cap, cooldown, heartbeat,
//!   cleanup interval, batch cleanup threshold, enable flag)
//!
//! Configuration is loaded once at startup and shared across all services.

use serde::{Deserialize, Serialize};
use std::env;

/// Get environment variable value or fallback to default.
pub fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Parse boolean values from environment variables.
///
/// Supported values: `"1"`/`"true"`/`"TRUE"` for true, `"0"`/`"false"`/`"FALSE"`
/// for false. Anything else (including missing) falls back.
pub fn bool_env(key: &str, fallback: bool) -> bool {
    match env::var(key).as_deref() {
        Ok("1") | Ok("true") | Ok("TRUE") => true,
        Ok("0") | Ok("false") | Ok("FALSE") => false,
        _ => fallback,
    }
}

/// Parse a numeric environment variable, falling back on missing or
/// unparseable values.
pub fn num_env<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Parse comma-separated values from environment variables.
pub fn parse_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Tuning knobs for the request scheduler (spec §4.D, §6 "Configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub cooldown_period: f64,
    pub heartbeat_timeout: f64,
    pub cleanup_interval: f64,
    pub batch_cleanup_threshold: usize,
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            cooldown_period: 3.0,
            heartbeat_timeout: 90.0,
            cleanup_interval: 45.0,
            batch_cleanup_threshold: 10,
            enabled: true,
        }
    }
}

/// Upstream railway reservation API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Per-call timeout in seconds (spec §4.A: 10s).
    pub timeout_secs: u64,
    /// Maximum concurrent pair-wise availability fetches per matrix
    /// (spec §4.C step 5: at most 10).
    pub fan_out_limit: usize,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub json_limit: usize,
    pub allowed_origins: Vec<String>,
    pub scheduler: SchedulerConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Server
    /// - `BIND_ADDRESS` (default `"127.0.0.1:8080"`)
    /// - `JSON_LIMIT` (default 8MB)
    /// - `ALLOWED_ORIGINS` (comma-separated)
    ///
    /// ## Upstream
    /// - `UPSTREAM_BASE_URL` (default `"https://railapi.railway.gov.bd/api"`)
    /// - `UPSTREAM_TIMEOUT_SECS` (default 10)
    /// - `UPSTREAM_FAN_OUT_LIMIT` (default 10)
    ///
    /// ## Scheduler
    /// - `QUEUE_MAX_CONCURRENT` (default 1)
    /// - `QUEUE_COOLDOWN_PERIOD` (default 3)
    /// - `QUEUE_HEARTBEAT_TIMEOUT` (default 90)
    /// - `QUEUE_CLEANUP_INTERVAL` (default 45)
    /// - `QUEUE_BATCH_CLEANUP_THRESHOLD` (default 10)
    /// - `QUEUE_ENABLED` (default true)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let allowed_origins_str = env::var("ALLOWED_ORIGINS").ok();
        let defaults = SchedulerConfig::default();

        Self {
            bind_address: env_or("BIND_ADDRESS", "127.0.0.1:8080"),
            json_limit: num_env("JSON_LIMIT", 8 * 1024 * 1024),
            allowed_origins: parse_csv(allowed_origins_str.as_deref()),
            scheduler: SchedulerConfig {
                max_concurrent: num_env("QUEUE_MAX_CONCURRENT", defaults.max_concurrent),
                cooldown_period: num_env("QUEUE_COOLDOWN_PERIOD", defaults.cooldown_period),
                heartbeat_timeout: num_env("QUEUE_HEARTBEAT_TIMEOUT", defaults.heartbeat_timeout),
                cleanup_interval: num_env("QUEUE_CLEANUP_INTERVAL", defaults.cleanup_interval),
                batch_cleanup_threshold: num_env(
                    "QUEUE_BATCH_CLEANUP_THRESHOLD",
                    defaults.batch_cleanup_threshold,
                ),
                enabled: bool_env("QUEUE_ENABLED", defaults.enabled),
            },
            upstream: UpstreamConfig {
                base_url: env_or("UPSTREAM_BASE_URL", "https://railapi.railway.gov.bd/api"),
                timeout_secs: num_env("UPSTREAM_TIMEOUT_SECS", 10),
                fan_out_limit: num_env("UPSTREAM_FAN_OUT_LIMIT", 10),
            },
        }
    }
}
