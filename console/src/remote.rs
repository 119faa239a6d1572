//! Boundary to the remote analysis service.
//!
//! Everything the controller knows about the service goes through
//! [`RemoteService`]. The HTTP implementation lives in `http_client`; tests use
//! a scripted fake.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::metrics::MetricsPayload;

/// Answer to a start or stop request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAck {
    pub acknowledged: bool,
    /// Mode label assigned by the service (e.g. "Real AI", "Simulation").
    pub mode: Option<String>,
    pub message: Option<String>,
}

impl SessionAck {
    /// Converts a negative acknowledgment into an error.
    pub fn into_result(self) -> Result<Self, RemoteError> {
        if self.acknowledged {
            Ok(self)
        } else {
            Err(RemoteError::Rejected {
                reason: self
                    .message
                    .unwrap_or_else(|| "acknowledgment refused".to_string()),
            })
        }
    }
}

/// A captured artifact (screenshot) stored by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    /// Whether the service's analysis pipeline is loaded. A reachable service
    /// without it runs in a degraded (simulation) mode.
    pub analysis_available: bool,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextVerdict {
    pub likely_machine_generated: bool,
    /// Confidence of the machine-generated verdict in [0, 1].
    pub confidence: f64,
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn start_session(&self, camera_id: u32) -> Result<SessionAck, RemoteError>;

    async fn stop_session(&self) -> Result<SessionAck, RemoteError>;

    async fn fetch_metrics(&self) -> Result<MetricsPayload, RemoteError>;

    async fn capture_artifact(&self) -> Result<Artifact, RemoteError>;

    async fn health(&self) -> Result<HealthReport, RemoteError>;

    async fn analyze_text(&self, text: &str) -> Result<TextVerdict, RemoteError>;
}

/// Bounds a remote call by `limit`. An elapsed timer becomes
/// [`RemoteError::Timeout`], whatever the underlying client would have done.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}
