//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::RemoteError;
use crate::metrics::MetricsPayload;
use crate::notifications::{NotificationDisplay, NotificationRequest, Severity};
use crate::remote::{Artifact, HealthReport, RemoteService, SessionAck, TextVerdict};

/// Lets every ready task run, then advances paused time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Long enough that any configured request timeout fires first.
const HANG: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct Step<T> {
    delay: Duration,
    result: Result<T, RemoteError>,
}

/// Scripted answers for one remote operation. Steps are consumed in order;
/// once exhausted every call gets the fallback.
pub struct Script<T> {
    steps: Mutex<VecDeque<Step<T>>>,
    fallback: Mutex<Step<T>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Result<T, RemoteError>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Step { delay: Duration::ZERO, result: fallback }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_ok(&self, value: T) {
        self.push(Duration::ZERO, Ok(value));
    }

    pub fn push_err(&self, error: RemoteError) {
        self.push(Duration::ZERO, Err(error));
    }

    pub fn push_delayed(&self, delay: Duration, result: Result<T, RemoteError>) {
        self.push(delay, result);
    }

    /// Next call never answers within any sane timeout.
    pub fn push_hang(&self) {
        self.push(HANG, Err(RemoteError::Transport { reason: "hung".into() }));
    }

    pub fn set_fallback(&self, result: Result<T, RemoteError>) {
        *self.fallback.lock() = Step { delay: Duration::ZERO, result };
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, delay: Duration, result: Result<T, RemoteError>) {
        self.steps.lock().push_back(Step { delay, result });
    }

    async fn answer(&self) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let next = self.steps.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().clone())
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}

/// Scripted [`RemoteService`]. Every operation succeeds by default.
pub struct FakeRemote {
    pub start: Script<SessionAck>,
    pub stop: Script<SessionAck>,
    pub metrics: Script<MetricsPayload>,
    pub capture: Script<Artifact>,
    pub health: Script<HealthReport>,
    pub analyze: Script<TextVerdict>,
    metrics_in_flight: AtomicUsize,
    max_metrics_in_flight: AtomicUsize,
    analyzed: Mutex<Vec<String>>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            start: Script::new(Ok(accepted(Some("Real AI")))),
            stop: Script::new(Ok(accepted(None))),
            metrics: Script::new(Ok(risk_payload(0.0))),
            capture: Script::new(Ok(Artifact { name: "screenshot_test.jpg".into() })),
            health: Script::new(Ok(HealthReport {
                analysis_available: true,
                mode: Some("Real AI".into()),
            })),
            analyze: Script::new(Ok(TextVerdict {
                likely_machine_generated: false,
                confidence: 0.1,
            })),
            metrics_in_flight: AtomicUsize::new(0),
            max_metrics_in_flight: AtomicUsize::new(0),
            analyzed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRemote {
    /// Highest number of metrics fetches that were pending at the same time.
    pub fn max_metrics_in_flight(&self) -> usize {
        self.max_metrics_in_flight.load(Ordering::SeqCst)
    }

    pub fn analyzed_texts(&self) -> Vec<String> {
        self.analyzed.lock().clone()
    }
}

/// Decrements the in-flight gauge even when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn start_session(&self, _camera_id: u32) -> Result<SessionAck, RemoteError> {
        self.start.answer().await
    }

    async fn stop_session(&self) -> Result<SessionAck, RemoteError> {
        self.stop.answer().await
    }

    async fn fetch_metrics(&self) -> Result<MetricsPayload, RemoteError> {
        let now = self.metrics_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_metrics_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.metrics_in_flight);
        self.metrics.answer().await
    }

    async fn capture_artifact(&self) -> Result<Artifact, RemoteError> {
        self.capture.answer().await
    }

    async fn health(&self) -> Result<HealthReport, RemoteError> {
        self.health.answer().await
    }

    async fn analyze_text(&self, text: &str) -> Result<TextVerdict, RemoteError> {
        self.analyzed.lock().push(text.to_string());
        self.analyze.answer().await
    }
}

pub fn accepted(mode: Option<&str>) -> SessionAck {
    SessionAck {
        acknowledged: true,
        mode: mode.map(str::to_string),
        message: None,
    }
}

pub fn refused(message: &str) -> SessionAck {
    SessionAck {
        acknowledged: false,
        mode: None,
        message: Some(message.to_string()),
    }
}

pub fn risk_payload(risk_score: f64) -> MetricsPayload {
    MetricsPayload {
        risk_score,
        person_count: 1,
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Shown(NotificationRequest),
    Dismissed(NotificationRequest),
}

/// Display that remembers everything it was asked to do.
#[derive(Default)]
pub struct RecordingDisplay {
    events: Mutex<Vec<(Instant, DisplayEvent)>>,
}

impl RecordingDisplay {
    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn shown(&self) -> Vec<NotificationRequest> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                DisplayEvent::Shown(r) => Some(r.clone()),
                DisplayEvent::Dismissed(_) => None,
            })
            .collect()
    }

    pub fn shown_messages(&self) -> Vec<String> {
        self.shown().into_iter().map(|r| r.message).collect()
    }

    pub fn shown_with(&self, severity: Severity) -> Vec<NotificationRequest> {
        self.shown()
            .into_iter()
            .filter(|r| r.severity == severity)
            .collect()
    }

    pub fn shown_at(&self) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, DisplayEvent::Shown(_)))
            .map(|(at, _)| *at)
            .collect()
    }
}

impl NotificationDisplay for RecordingDisplay {
    fn show(&self, request: &NotificationRequest) {
        self.events
            .lock()
            .push((Instant::now(), DisplayEvent::Shown(request.clone())));
    }

    fn dismiss(&self, request: &NotificationRequest) {
        self.events
            .lock()
            .push((Instant::now(), DisplayEvent::Dismissed(request.clone())));
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 10, 17, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self { now: Mutex::new(start) }
    }
}

impl ManualClock {
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    pub fn rewind(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now = *now - by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
