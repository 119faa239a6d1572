use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

pub const MIN_POLL_INTERVAL_MS: u64 = 500;
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

pub const MIN_LOG_CAPACITY: usize = 1;
pub const MAX_LOG_CAPACITY: usize = 10_000;
pub const DEFAULT_LOG_CAPACITY: usize = 100;
pub const DEFAULT_PREVIEW_CHARS: usize = 100;
pub const DEFAULT_RECENT_COUNT: usize = 10;
pub const DEFAULT_ANALYSIS_THRESHOLD_CHARS: usize = 50;

pub const DEFAULT_TRANSITION_MS: u64 = 300;
pub const DEFAULT_INFO_MS: u64 = 3_000;
pub const DEFAULT_SUCCESS_MS: u64 = 3_000;
pub const DEFAULT_WARNING_MS: u64 = 4_000;
pub const DEFAULT_ERROR_MS: u64 = 5_000;
/// Duration of the machine-generated-text warning, which must stay up longer
/// than ordinary warnings.
pub const DEFAULT_INTEGRITY_ALERT_MS: u64 = 8_000;

pub const MAX_RISK_SCORE: f64 = 10.0;
pub const DEFAULT_WARNING_THRESHOLD: f64 = 5.0;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 7.0;

/// Root configuration structure. Deserialized from `config.toml` in the
/// application directory.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub violations: ViolationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the remote analysis service lives and how long we wait for it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Upper bound for every request to the service, in milliseconds.
    pub request_timeout_ms: u64,
    /// Camera the service should open when a session starts.
    pub camera_id: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            camera_id: 0,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    /// Metrics poll interval in milliseconds. Must lie in [500, 10000].
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: DEFAULT_POLL_INTERVAL_MS }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Clipboard monitoring settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViolationConfig {
    /// When false the recorder is never attached.
    pub enabled: bool,
    pub monitor_context_menu: bool,
    /// Maximum number of records retained in the violation log.
    pub capacity: usize,
    /// Number of characters of captured text kept in a record's preview.
    pub preview_chars: usize,
    /// Number of records returned by the stats view.
    pub recent_count: usize,
    /// Pastes longer than this many characters are sent for text analysis.
    pub analysis_threshold_chars: usize,
    pub analyze_pastes: bool,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor_context_menu: true,
            capacity: DEFAULT_LOG_CAPACITY,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            recent_count: DEFAULT_RECENT_COUNT,
            analysis_threshold_chars: DEFAULT_ANALYSIS_THRESHOLD_CHARS,
            analyze_pastes: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    /// Pause between dismissing one notification and showing the next.
    pub transition_ms: u64,
    pub info_ms: u64,
    pub success_ms: u64,
    pub warning_ms: u64,
    pub error_ms: u64,
    pub integrity_alert_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            transition_ms: DEFAULT_TRANSITION_MS,
            info_ms: DEFAULT_INFO_MS,
            success_ms: DEFAULT_SUCCESS_MS,
            warning_ms: DEFAULT_WARNING_MS,
            error_ms: DEFAULT_ERROR_MS,
            integrity_alert_ms: DEFAULT_INTEGRITY_ALERT_MS,
        }
    }
}

/// Risk score thresholds used when the service does not report an alert level.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

/// What to do when the service rejects a stop request.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopFailurePolicy {
    /// Log the disagreement and return to Idle anyway.
    #[default]
    ForceIdle,
    /// Stay Active and resume polling and recording.
    RemainActive,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub stop_failure_policy: StopFailurePolicy,
}

impl Config {
    /// Rejects values outside their documented ranges. Called once at setup;
    /// nothing downstream re-checks these.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "service.request_timeout_ms",
            self.service.request_timeout_ms,
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        if self.service.base_url.trim().is_empty() {
            return Err(invalid("service.base_url", "\"\"", "must not be empty"));
        }
        check_range(
            "polling.interval_ms",
            self.polling.interval_ms,
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
        )?;
        check_range(
            "violations.capacity",
            self.violations.capacity,
            MIN_LOG_CAPACITY,
            MAX_LOG_CAPACITY,
        )?;
        if self.violations.preview_chars == 0 {
            return Err(invalid("violations.preview_chars", "0", "must be at least 1"));
        }
        if self.violations.recent_count == 0 {
            return Err(invalid("violations.recent_count", "0", "must be at least 1"));
        }

        let alerts = &self.alerts;
        let ordered = 0.0 <= alerts.warning_threshold
            && alerts.warning_threshold < alerts.critical_threshold
            && alerts.critical_threshold <= MAX_RISK_SCORE;
        if !ordered {
            return Err(invalid(
                "alerts",
                &format!("{}/{}", alerts.warning_threshold, alerts.critical_threshold),
                "thresholds must satisfy 0 <= warning < critical <= 10",
            ));
        }
        Ok(())
    }
}

fn check_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(invalid(
            field,
            &value.to_string(),
            &format!("must be between {min} and {max}"),
        ));
    }
    Ok(())
}

fn invalid(field: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Loads the config at `path`, applies a command-line `base_url` override and
/// validates the result. A missing file gives the defaults; a file that fails
/// to parse or holds out-of-range values is an error.
pub fn load(path: &Path, base_url: Option<String>) -> Result<Config> {
    let mut config = load_or_default(path)?;
    if let Some(base_url) = base_url {
        config.service.base_url = base_url;
    }
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}
