use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AlertConfig, MAX_RISK_SCORE};
use crate::error::RemoteError;

/// Severity bucket for the current risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Buckets `risk_score` using the configured thresholds (both inclusive).
    pub fn classify(risk_score: f64, thresholds: &AlertConfig) -> Self {
        if risk_score >= thresholds.critical_threshold {
            AlertLevel::Critical
        } else if risk_score >= thresholds.warning_threshold {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Normal => "NORMAL",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProhibitedItem {
    #[serde(alias = "item")]
    pub label: String,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
}

/// Metrics payload as returned by `GET /api/get_results`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetricsPayload {
    pub risk_score: f64,
    #[serde(default)]
    pub alert_level: Option<AlertLevel>,
    #[serde(default)]
    pub gaze_level: u32,
    #[serde(default)]
    pub person_count: u32,
    #[serde(default)]
    pub prohibited_items: Vec<ProhibitedItem>,
    #[serde(default)]
    pub frames_processed: u64,
    #[serde(default, alias = "uptime")]
    pub uptime_seconds: f64,
    #[serde(default, alias = "ai_mode")]
    pub mode: Option<String>,
}

/// The latest full metrics result. Replaced wholesale by every successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub risk_score: f64,
    pub alert_level: AlertLevel,
    pub gaze_level: u32,
    pub person_count: u32,
    pub prohibited_items: Vec<ProhibitedItem>,
    pub frames_processed: u64,
    pub uptime_seconds: f64,
    pub mode: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Validates a wire payload and turns it into a snapshot. The alert level
    /// reported by the service wins; otherwise it is derived from the score.
    pub fn from_payload(
        payload: MetricsPayload,
        thresholds: &AlertConfig,
        received_at: DateTime<Utc>,
    ) -> Result<Self, RemoteError> {
        if !payload.risk_score.is_finite()
            || payload.risk_score < 0.0
            || payload.risk_score > MAX_RISK_SCORE
        {
            return Err(RemoteError::Malformed {
                reason: format!("risk_score {} outside [0, 10]", payload.risk_score),
            });
        }
        if let Some(item) = payload
            .prohibited_items
            .iter()
            .find(|i| !(0.0..=1.0).contains(&i.confidence))
        {
            return Err(RemoteError::Malformed {
                reason: format!(
                    "confidence {} for '{}' outside [0, 1]",
                    item.confidence, item.label
                ),
            });
        }
        if !payload.uptime_seconds.is_finite() || payload.uptime_seconds < 0.0 {
            return Err(RemoteError::Malformed {
                reason: format!("uptime {} is not a valid duration", payload.uptime_seconds),
            });
        }

        let alert_level = payload
            .alert_level
            .unwrap_or_else(|| AlertLevel::classify(payload.risk_score, thresholds));

        Ok(Self {
            risk_score: payload.risk_score,
            alert_level,
            gaze_level: payload.gaze_level,
            person_count: payload.person_count,
            prohibited_items: payload.prohibited_items,
            frames_processed: payload.frames_processed,
            uptime_seconds: payload.uptime_seconds,
            mode: payload.mode,
            received_at,
        })
    }
}
