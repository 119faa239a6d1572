use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::metrics::{AlertLevel, MetricsSnapshot};
use crate::session::{Connectivity, SessionState};

/// Runtime status written by the console to `status.toml`.
/// A dashboard reads this file (read-only) to display the session.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleStatus {
    /// Console binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: SessionState,
    pub connectivity: Connectivity,
    /// Mode label reported by the service for the running session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<AlertLevel>,
    /// Violations recorded since the log was last cleared.
    pub violations: u64,
    /// Name of the most recently captured screenshot, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_artifact: Option<String>,
    /// Human-readable message for the most recent failed operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Notification currently on screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
}

impl ConsoleStatus {
    /// Constructs the initial idle status on startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: SessionState::Idle,
            connectivity: Connectivity::Unknown,
            mode: None,
            risk_score: None,
            alert_level: None,
            violations: 0,
            last_artifact: None,
            error: None,
            notification: None,
        }
    }

    /// Copies risk and alert level from `snapshot`, or clears them.
    pub fn apply_metrics(&mut self, snapshot: Option<&MetricsSnapshot>) {
        self.risk_score = snapshot.map(|s| s.risk_score);
        self.alert_level = snapshot.map(|s| s.alert_level);
    }
}

impl Default for ConsoleStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist. Failures are logged;
/// a status write never takes the console down.
pub fn write_status(path: &Path, status: &ConsoleStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("failed to write status file {}: {e}", path.display());
            }
        }
        Err(e) => warn!("failed to serialize status: {e}"),
    }
}
