use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::RemoteError;
use crate::metrics::MetricsPayload;
use crate::remote::{Artifact, HealthReport, RemoteService, SessionAck, TextVerdict};

const START_PATH: &str = "/api/start_proctoring";
const STOP_PATH: &str = "/api/stop_proctoring";
const RESULTS_PATH: &str = "/api/get_results";
const SCREENSHOT_PATH: &str = "/api/take_screenshot";
const SYSTEM_STATUS_PATH: &str = "/api/get_system_status";
const ANALYZE_TEXT_PATH: &str = "/api/analyze_text";

/// `{"status": "success" | "error", ...}` envelope used by the lifecycle and
/// capture endpoints.
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    ai_mode: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

impl StatusEnvelope {
    fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }

    fn into_ack(self) -> SessionAck {
        SessionAck {
            acknowledged: self.is_success(),
            mode: self.ai_mode,
            message: self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SystemStatus {
    #[serde(default)]
    ai_available: bool,
    #[serde(default)]
    ai_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextAnalysis {
    is_ai_generated: bool,
    /// Percentage in [0, 100].
    #[serde(default)]
    ai_confidence: f64,
}

#[derive(Serialize)]
struct StartRequest {
    camera_id: u32,
}

#[derive(Serialize)]
struct AnalyzeTextRequest<'a> {
    text: &'a str,
}

/// [`RemoteService`] over HTTP/JSON with reqwest.
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &ServiceConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Transport { reason: e.to_string() })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        debug!(path, "GET");
        let response = self.client.get(self.url(path)).send().await?;
        decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        debug!(path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::Status { status: status.as_u16() });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Malformed { reason: e.to_string() })
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn start_session(&self, camera_id: u32) -> Result<SessionAck, RemoteError> {
        let envelope: StatusEnvelope = self.post(START_PATH, &StartRequest { camera_id }).await?;
        Ok(envelope.into_ack())
    }

    async fn stop_session(&self) -> Result<SessionAck, RemoteError> {
        let envelope: StatusEnvelope = self.post(STOP_PATH, &serde_json::json!({})).await?;
        Ok(envelope.into_ack())
    }

    async fn fetch_metrics(&self) -> Result<MetricsPayload, RemoteError> {
        self.get(RESULTS_PATH).await
    }

    async fn capture_artifact(&self) -> Result<Artifact, RemoteError> {
        let envelope: StatusEnvelope =
            self.post(SCREENSHOT_PATH, &serde_json::json!({})).await?;
        if !envelope.is_success() {
            return Err(RemoteError::Rejected {
                reason: envelope
                    .message
                    .unwrap_or_else(|| "capture refused".to_string()),
            });
        }
        let name = envelope.filename.ok_or_else(|| RemoteError::Malformed {
            reason: "capture response has no filename".to_string(),
        })?;
        Ok(Artifact { name })
    }

    async fn health(&self) -> Result<HealthReport, RemoteError> {
        let status: SystemStatus = self.get(SYSTEM_STATUS_PATH).await?;
        Ok(HealthReport {
            analysis_available: status.ai_available,
            mode: status.ai_mode,
        })
    }

    async fn analyze_text(&self, text: &str) -> Result<TextVerdict, RemoteError> {
        let analysis: TextAnalysis = self
            .post(ANALYZE_TEXT_PATH, &AnalyzeTextRequest { text })
            .await?;
        Ok(TextVerdict {
            likely_machine_generated: analysis.is_ai_generated,
            confidence: (analysis.ai_confidence / 100.0).clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_for(server: &MockServer, timeout_ms: u64) -> HttpRemote {
        HttpRemote::new(&ServiceConfig {
            base_url: format!("{}/", server.uri()),
            request_timeout_ms: timeout_ms,
            camera_id: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn start_session_sends_camera_and_reads_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(START_PATH))
            .and(body_json(json!({"camera_id": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Proctoring started",
                "ai_mode": "Real AI"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = remote_for(&server, 1_000).start_session(2).await.unwrap();
        assert!(ack.acknowledged);
        assert_eq!(ack.mode.as_deref(), Some("Real AI"));
    }

    #[tokio::test]
    async fn start_session_error_status_is_not_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(START_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "Failed to start camera"
            })))
            .mount(&server)
            .await;

        let ack = remote_for(&server, 1_000).start_session(0).await.unwrap();
        assert!(!ack.acknowledged);
        assert_eq!(ack.message.as_deref(), Some("Failed to start camera"));
    }

    #[tokio::test]
    async fn non_2xx_maps_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STOP_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = remote_for(&server, 1_000).stop_session().await.unwrap_err();
        assert_eq!(err, RemoteError::Status { status: 503 });
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SYSTEM_STATUS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ai_available": true}))
                    .set_delay(Duration::from_millis(1_500)),
            )
            .mount(&server)
            .await;

        let err = remote_for(&server, 200).health().await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout);
    }

    #[tokio::test]
    async fn fetch_metrics_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "risk_score": 4,
                "alert_level": "WARNING",
                "gaze_level": 1,
                "person_count": 1,
                "prohibited_items": [],
                "frames_processed": 37,
                "uptime": 12.5
            })))
            .mount(&server)
            .await;

        let payload = remote_for(&server, 1_000).fetch_metrics().await.unwrap();
        assert_eq!(payload.risk_score, 4.0);
        assert_eq!(payload.frames_processed, 37);
    }

    #[tokio::test]
    async fn fetch_metrics_with_garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESULTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = remote_for(&server, 1_000).fetch_metrics().await.unwrap_err();
        assert!(matches!(err, RemoteError::Malformed { .. }), "{err}");
    }

    #[tokio::test]
    async fn capture_artifact_returns_filename() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCREENSHOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "filename": "screenshot_20261017_101500.jpg"
            })))
            .mount(&server)
            .await;

        let artifact = remote_for(&server, 1_000).capture_artifact().await.unwrap();
        assert_eq!(artifact.name, "screenshot_20261017_101500.jpg");
    }

    #[tokio::test]
    async fn capture_artifact_without_frame_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCREENSHOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "No frame available"
            })))
            .mount(&server)
            .await;

        let err = remote_for(&server, 1_000).capture_artifact().await.unwrap_err();
        assert_eq!(err, RemoteError::Rejected { reason: "No frame available".into() });
    }

    #[tokio::test]
    async fn analyze_text_normalises_confidence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANALYZE_TEXT_PATH))
            .and(body_json(json!({"text": "some pasted essay"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_ai_generated": true,
                "ai_confidence": 87.5
            })))
            .mount(&server)
            .await;

        let verdict = remote_for(&server, 1_000)
            .analyze_text("some pasted essay")
            .await
            .unwrap();
        assert!(verdict.likely_machine_generated);
        assert!((verdict.confidence - 0.875).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        // Nothing listens on port 9 on loopback.
        let remote = HttpRemote::new(&ServiceConfig {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_ms: 1_000,
            camera_id: 0,
        })
        .unwrap();
        let err = remote.health().await.unwrap_err();
        assert!(
            matches!(err, RemoteError::Transport { .. } | RemoteError::Timeout),
            "{err}"
        );
    }
}
