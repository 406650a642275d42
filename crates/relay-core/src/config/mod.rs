//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `RELAY_CONFIG` env var
//! 3. **Environment variables**: `RELAY__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`SessionManagerConfig`]: session pool sizing and provider failure policy
//! - [`HealthCheckConfig`]: out-of-band endpoint liveness probing
//! - [`MetricsConfig`]: metrics recording
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [session]
//! sessions_per_endpoint = 10
//! provider_failure_threshold = 5
//!
//! [health_check]
//! interval_seconds = 30
//! probe_timeout_ms = 500
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Session pool and failure policy settings for the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Number of sessions created for each endpoint of each paired provider. Bounds the
    /// number of parallel relays per endpoint. Must be greater than 0. Defaults to `10`.
    #[serde(default = "default_sessions_per_endpoint")]
    pub sessions_per_endpoint: usize,

    /// Number of consecutive session failures (of kinds that only retire the session)
    /// after which the provider is blocked for the rest of the epoch. `None` disables
    /// the streak check. Defaults to `5`.
    #[serde(default = "default_provider_failure_threshold")]
    pub provider_failure_threshold: Option<u32>,
}

fn default_sessions_per_endpoint() -> usize {
    10
}

#[allow(clippy::unnecessary_wraps)]
fn default_provider_failure_threshold() -> Option<u32> {
    Some(5)
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            sessions_per_endpoint: default_sessions_per_endpoint(),
            provider_failure_threshold: default_provider_failure_threshold(),
        }
    }
}

/// Endpoint liveness probing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether the background monitor runs. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between probe rounds in seconds. Must be greater than 0. Defaults to `30`.
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,

    /// Per-endpoint probe timeout in milliseconds. Must be greater than 0. Defaults to `500`.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_interval_seconds() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    500
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_health_interval_seconds(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Metrics recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are recorded. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Root application configuration.
///
/// Loaded with the `RELAY` prefix for environment overrides using `__` as a separator
/// (e.g. `RELAY__SESSION__SESSIONS_PER_ENDPOINT=4`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionManagerConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; compiled defaults apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("session.sessions_per_endpoint", 10)?
            .set_default("health_check.enabled", true)?
            .set_default("health_check.interval_seconds", 30)?
            .set_default("health_check.probe_timeout_ms", 500)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/relay.toml`, overridable through `RELAY_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/relay.toml".to_string());
        Self::from_file(&config_path)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check.interval_seconds)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check.probe_timeout_ms)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.session.sessions_per_endpoint == 0 {
            return Err("Sessions per endpoint must be greater than 0".to_string());
        }

        if self.session.provider_failure_threshold == Some(0) {
            return Err(
                "Provider failure threshold must be greater than 0 (omit it to disable)"
                    .to_string(),
            );
        }

        if self.health_check.interval_seconds == 0 {
            return Err("Health check interval must be greater than 0".to_string());
        }

        if self.health_check.probe_timeout_ms == 0 {
            return Err("Probe timeout must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
