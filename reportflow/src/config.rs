//! Configuration for the report job.
//!
//! Every field has a default, so an empty JSON object or an empty
//! environment yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;

/// Prefix of every environment variable read by [`ReportflowConfig::from_env`].
pub const ENV_PREFIX: &str = "REPORTFLOW_";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportflowConfig {
    /// Retry budget for fetching cost data.
    #[serde(default)]
    pub fetch_retry: RetryConfig,
    /// Retry budget for delivering the report.
    #[serde(default)]
    pub deliver_retry: RetryConfig,
    /// Extended retry budget once finalize has failed transiently.
    #[serde(default = "RetryConfig::finalize_default")]
    pub finalize_retry: RetryConfig,
    /// Hard deadline for a whole run.
    #[serde(default)]
    pub invocation_timeout_seconds: Option<f64>,
    /// Runs slower than this log a warning.
    #[serde(default = "default_slo_seconds")]
    pub slo_seconds: f64,
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// JSON ledger file used by the binary.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Directory the binary writes delivered reports to.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
    /// Directory the binary reads `<date>.json` cost data from.
    #[serde(default = "default_cost_data_dir")]
    pub cost_data_dir: PathBuf,
    /// Optional JSON-lines file receiving outcome events.
    #[serde(default)]
    pub events_path: Option<PathBuf>,
    /// Hour (UTC) at which the daily run is scheduled.
    #[serde(default = "default_schedule_hour")]
    pub schedule_hour_utc: u32,
    /// How long after the scheduled time a missing run is tolerated.
    #[serde(default = "default_liveness_window_hours")]
    pub liveness_window_hours: u32,
}

fn default_slo_seconds() -> f64 {
    30.0
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("reportflow-ledger.json")
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

fn default_cost_data_dir() -> PathBuf {
    PathBuf::from("cost-data")
}

fn default_schedule_hour() -> u32 {
    8
}

fn default_liveness_window_hours() -> u32 {
    25
}

impl Default for ReportflowConfig {
    fn default() -> Self {
        Self {
            fetch_retry: RetryConfig::default(),
            deliver_retry: RetryConfig::default(),
            finalize_retry: RetryConfig::finalize_default(),
            invocation_timeout_seconds: None,
            slo_seconds: default_slo_seconds(),
            logging: LoggingConfig::default(),
            ledger_path: default_ledger_path(),
            outbox_dir: default_outbox_dir(),
            cost_data_dir: default_cost_data_dir(),
            events_path: None,
            schedule_hour_utc: default_schedule_hour(),
            liveness_window_hours: default_liveness_window_hours(),
        }
    }
}

impl ReportflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Load configuration from environment variables.
    ///
    /// Optional (all prefixed with `REPORTFLOW_`):
    /// - `LOG_LEVEL`, `LOG_JSON`
    /// - `LEDGER_PATH`, `OUTBOX_DIR`, `COST_DATA_DIR`, `EVENTS_PATH`
    /// - `INVOCATION_TIMEOUT_SECONDS`, `SLO_SECONDS`
    /// - `FETCH_MAX_ATTEMPTS`, `DELIVER_MAX_ATTEMPTS`, `FINALIZE_MAX_ATTEMPTS`
    /// - `BASE_DELAY_MS` (fetch and deliver)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(level) = get("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = get("LOG_JSON") {
            config.logging.json = parse_bool("LOG_JSON", &json)?;
        }
        if let Some(path) = get("LEDGER_PATH") {
            config.ledger_path = PathBuf::from(path);
        }
        if let Some(dir) = get("OUTBOX_DIR") {
            config.outbox_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("COST_DATA_DIR") {
            config.cost_data_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("EVENTS_PATH") {
            config.events_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get("INVOCATION_TIMEOUT_SECONDS") {
            config.invocation_timeout_seconds = Some(parse_var("INVOCATION_TIMEOUT_SECONDS", &raw)?);
        }
        if let Some(raw) = get("SLO_SECONDS") {
            config.slo_seconds = parse_var("SLO_SECONDS", &raw)?;
        }
        if let Some(raw) = get("FETCH_MAX_ATTEMPTS") {
            config.fetch_retry.max_attempts = parse_var("FETCH_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("DELIVER_MAX_ATTEMPTS") {
            config.deliver_retry.max_attempts = parse_var("DELIVER_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("FINALIZE_MAX_ATTEMPTS") {
            config.finalize_retry.max_attempts = parse_var("FINALIZE_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("BASE_DELAY_MS") {
            let base: u64 = parse_var("BASE_DELAY_MS", &raw)?;
            config.fetch_retry.base_delay_ms = base;
            config.deliver_retry.base_delay_ms = base;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the job cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.invocation_timeout_seconds {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(invalid("invocation_timeout_seconds", "must be a positive number"));
            }
            if Duration::try_from_secs_f64(timeout).is_err() {
                return Err(invalid("invocation_timeout_seconds", "is too large"));
            }
        }
        if !self.slo_seconds.is_finite() || self.slo_seconds < 0.0 {
            return Err(invalid("slo_seconds", "must be a non-negative number"));
        }
        if Duration::try_from_secs_f64(self.slo_seconds).is_err() {
            return Err(invalid("slo_seconds", "is too large"));
        }
        if self.schedule_hour_utc > 23 {
            return Err(invalid("schedule_hour_utc", "must be between 0 and 23"));
        }
        Ok(())
    }

    /// The run deadline as a duration, if configured and representable.
    #[must_use]
    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// The latency objective. `None` when disabled with zero or unrepresentable.
    #[must_use]
    pub fn slo(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.slo_seconds)
            .ok()
            .filter(|slo| !slo.is_zero())
    }
}

fn invalid(var: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(&format!("{ENV_PREFIX}{name}"), e.to_string()))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(
            &format!("{ENV_PREFIX}{name}"),
            format!("expected a boolean, got '{other}'"),
        )),
    }
}
