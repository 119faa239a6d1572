//! Proctoring session lifecycle.
//!
//! [`SessionController`] owns the session state machine and drives the
//! polling loop and violation recorder from it:
//!
//! ```text
//! Idle ──start──▶ Starting ──ack──▶ Active ──stop──▶ Stopping ──ack──▶ Idle
//!                    │                                   │
//!                    └─failure─▶ Error ─▶ Idle           └─failure─▶ per policy
//! ```
//!
//! Lifecycle decisions are made under one lock that is never held across an
//! await, so concurrent calls see a consistent state. Every state change is
//! also published, in order, as a [`StateChange`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, StopFailurePolicy};
use crate::error::{ConfigError, LifecycleError, RemoteError};
use crate::metrics::MetricsSnapshot;
use crate::notifications::Notifier;
use crate::polling::{ActiveSession, PollCounters, PollTarget, PollingLoop};
use crate::remote::{with_timeout, Artifact, RemoteService, SessionAck};
use crate::violations::{
    DocumentEvents, PasteAnalyzer, ViolationRecord, ViolationRecorder, ViolationStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    /// Transient; a failed start passes through here on its way back to Idle.
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }
}

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// One edge taken by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
}

/// Reachability of the remote service as of the last health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Unknown,
    /// Reachable with its analysis pipeline loaded.
    Connected,
    /// Reachable but degraded (simulation mode).
    Warning,
    Error,
}

impl Connectivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Connectivity::Unknown => "unknown",
            Connectivity::Connected => "connected",
            Connectivity::Warning => "warning",
            Connectivity::Error => "error",
        }
    }
}

/// What happened during one session, logged when it ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub polls: PollCounters,
    pub violations: u64,
}

impl SessionSummary {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

struct ActiveInfo {
    epoch: u64,
    mode: String,
    started_at: DateTime<Utc>,
    violations_at_start: u64,
}

struct Lifecycle {
    poller: PollingLoop,
    last_epoch: u64,
    current: Option<ActiveInfo>,
    last_summary: Option<SessionSummary>,
}

pub struct SessionController {
    camera_id: u32,
    request_timeout: Duration,
    stop_policy: StopFailurePolicy,
    record_violations: bool,

    remote: Arc<dyn RemoteService>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    recorder: ViolationRecorder,
    active: ActiveSession,

    state_tx: watch::Sender<SessionState>,
    transitions_tx: broadcast::Sender<StateChange>,
    metrics_tx: watch::Sender<Option<MetricsSnapshot>>,
    connectivity_tx: watch::Sender<Connectivity>,

    lifecycle: Mutex<Lifecycle>,
}

impl SessionController {
    /// Builds an idle controller. `config` is validated here; nothing
    /// downstream re-checks it.
    pub fn new(
        config: &Config,
        remote: Arc<dyn RemoteService>,
        notifier: Notifier,
        document: DocumentEvents,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let request_timeout = config.service.request_timeout();
        let analyzer = PasteAnalyzer {
            remote: Arc::clone(&remote),
            notifier: notifier.clone(),
            timeout: request_timeout,
        };
        let recorder =
            ViolationRecorder::new(&config.violations, document, Arc::clone(&clock), Some(analyzer));
        let poller = PollingLoop::new(config.polling.interval(), request_timeout, config.alerts);

        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let (metrics_tx, _) = watch::channel(None);
        let (connectivity_tx, _) = watch::channel(Connectivity::Unknown);

        Ok(Self {
            camera_id: config.service.camera_id,
            request_timeout,
            stop_policy: config.session.stop_failure_policy,
            record_violations: config.violations.enabled,
            remote,
            notifier,
            clock,
            recorder,
            active: ActiveSession::default(),
            state_tx,
            transitions_tx,
            metrics_tx,
            connectivity_tx,
            lifecycle: Mutex::new(Lifecycle {
                poller,
                last_epoch: 0,
                current: None,
                last_summary: None,
            }),
        })
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Starts a session. Outside Idle this does nothing beyond a warning
    /// notification and returns `Ok`.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        {
            let _life = self.lifecycle.lock();
            match self.state() {
                SessionState::Idle | SessionState::Error => {}
                SessionState::Starting | SessionState::Active => {
                    warn!("start requested while a session is already running");
                    self.notifier.warning("A proctoring session is already active");
                    return Ok(());
                }
                SessionState::Stopping => {
                    warn!("start requested while the previous session is stopping");
                    self.notifier
                        .warning("The previous session is still stopping; try again shortly");
                    return Ok(());
                }
            }
            self.set_state(SessionState::Starting);
        }

        info!(camera_id = self.camera_id, "starting proctoring session");
        let outcome = with_timeout(self.request_timeout, self.remote.start_session(self.camera_id))
            .await
            .and_then(SessionAck::into_result);

        match outcome {
            Ok(ack) => {
                let mode = ack.mode.unwrap_or_else(|| "unknown".to_string());
                self.activate(mode.clone(), self.clock.now());
                info!(mode = mode.as_str(), "proctoring session active");
                self.notifier.success(format!("Proctoring started ({mode} mode)"));
                Ok(())
            }
            Err(e) => {
                let err = LifecycleError::Start(e);
                error!("{err}");
                {
                    let _life = self.lifecycle.lock();
                    self.set_state(SessionState::Error);
                    // Queued before Idle is published.
                    self.notifier.error(capitalize(&err.to_string()));
                    self.set_state(SessionState::Idle);
                }
                Err(err)
            }
        }
    }

    /// Ends the active session. Polling and clipboard monitoring stop before
    /// the service is contacted. Outside Active this does nothing beyond a
    /// warning notification and returns `Ok`.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let (info, polls) = {
            let mut life = self.lifecycle.lock();
            if self.state() != SessionState::Active {
                warn!(state = self.state().as_str(), "stop requested without an active session");
                self.notifier.warning("No active proctoring session to stop");
                return Ok(());
            }
            life.poller.stop();
            self.active.close(&self.metrics_tx);
            self.recorder.stop();
            self.set_state(SessionState::Stopping);
            (life.current.take(), life.poller.counters())
        };

        info!("stopping proctoring session");
        let outcome = with_timeout(self.request_timeout, self.remote.stop_session())
            .await
            .and_then(SessionAck::into_result);

        let err = match outcome {
            Ok(_) => {
                self.finish(info, polls);
                self.notifier.info("Proctoring stopped");
                return Ok(());
            }
            Err(e) => LifecycleError::Stop(e),
        };

        match self.stop_policy {
            StopFailurePolicy::ForceIdle => {
                warn!("{err}; service may still consider the session running, ending it locally");
                self.finish(info, polls);
                self.notifier
                    .warning(format!("{}; session ended locally", capitalize(&err.to_string())));
            }
            StopFailurePolicy::RemainActive => {
                error!("{err}; session remains active");
                let (mode, started_at) = match info {
                    Some(info) => (info.mode, info.started_at),
                    None => ("unknown".to_string(), self.clock.now()),
                };
                self.activate(mode, started_at);
                self.notifier
                    .error(format!("{}; session is still active", capitalize(&err.to_string())));
            }
        }
        Err(err)
    }

    /// Enters Active under a fresh epoch and starts polling and recording.
    fn activate(&self, mode: String, started_at: DateTime<Utc>) {
        let mut life = self.lifecycle.lock();
        life.last_epoch += 1;
        let epoch = life.last_epoch;

        self.active.open(epoch, &self.metrics_tx);
        life.poller.start(PollTarget {
            remote: Arc::clone(&self.remote),
            latest: self.metrics_tx.clone(),
            session: self.active.clone(),
            epoch,
            clock: Arc::clone(&self.clock),
        });
        if self.record_violations {
            self.recorder.start();
        }
        life.current = Some(ActiveInfo {
            epoch,
            mode,
            started_at,
            violations_at_start: self.recorder.stats().total,
        });
        self.set_state(SessionState::Active);
        debug!(epoch, "session activated");
    }

    fn finish(&self, info: Option<ActiveInfo>, polls: PollCounters) {
        let mut life = self.lifecycle.lock();
        if let Some(info) = info {
            let summary = SessionSummary {
                mode: info.mode,
                started_at: info.started_at,
                ended_at: self.clock.now(),
                polls,
                violations: self.recorder.stats().total.saturating_sub(info.violations_at_start),
            };
            info!(
                epoch = info.epoch,
                mode = summary.mode.as_str(),
                duration_secs = summary.duration().num_seconds(),
                polls_applied = summary.polls.applied,
                polls_failed = summary.polls.failed,
                polls_skipped = summary.polls.skipped,
                violations = summary.violations,
                peak_risk = summary.polls.peak_risk,
                "session summary"
            );
            life.last_summary = Some(summary);
        }
        self.set_state(SessionState::Idle);
    }

    // ── one-shot requests ─────────────────────────────────────────────────────

    /// Asks the service to capture a screenshot. Never touches session state.
    pub async fn take_snapshot(&self) -> Result<Artifact, RemoteError> {
        match with_timeout(self.request_timeout, self.remote.capture_artifact()).await {
            Ok(artifact) => {
                info!(artifact = artifact.name.as_str(), "screenshot captured");
                self.notifier.success(format!("Screenshot saved: {}", artifact.name));
                Ok(artifact)
            }
            Err(e) => {
                warn!("screenshot failed: {e}");
                self.notifier.error(format!("Screenshot failed: {e}"));
                Err(e)
            }
        }
    }

    /// Queries service reachability and mode, independent of session state.
    pub async fn check_remote_health(&self) -> Connectivity {
        let connectivity = match with_timeout(self.request_timeout, self.remote.health()).await {
            Ok(report) if report.analysis_available => {
                debug!(mode = report.mode.as_deref().unwrap_or("unknown"), "service healthy");
                Connectivity::Connected
            }
            Ok(report) => {
                warn!(
                    mode = report.mode.as_deref().unwrap_or("unknown"),
                    "service reachable but analysis unavailable"
                );
                Connectivity::Warning
            }
            Err(e) => {
                warn!("health check failed: {e}");
                self.notifier.error(format!("Analysis service unreachable: {e}"));
                Connectivity::Error
            }
        };
        self.connectivity_tx.send_replace(connectivity);
        connectivity
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Every state change from now on, none coalesced.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateChange> {
        self.transitions_tx.subscribe()
    }

    pub fn latest_metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics_tx.borrow().clone()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<MetricsSnapshot>> {
        self.metrics_tx.subscribe()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity_tx.borrow()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity_tx.subscribe()
    }

    pub fn subscribe_violations(&self) -> broadcast::Receiver<ViolationRecord> {
        self.recorder.subscribe()
    }

    pub fn violation_stats(&self) -> ViolationStats {
        self.recorder.stats()
    }

    /// Empties the violation log. Sessions never do this on their own.
    pub fn clear_violations(&self) {
        self.recorder.clear();
        info!("violation log cleared");
    }

    /// Mode label of the running session.
    pub fn mode(&self) -> Option<String> {
        self.lifecycle.lock().current.as_ref().map(|c| c.mode.clone())
    }

    pub fn last_summary(&self) -> Option<SessionSummary> {
        self.lifecycle.lock().last_summary.clone()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = previous.as_str(), to = next.as_str(), "session state changed");
            // No subscribers is fine.
            let _ = self.transitions_tx.send(StateChange { from: previous, to: next });
        }
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
