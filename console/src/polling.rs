//! Periodic metrics polling for an active session.
//!
//! One timer task per loop, tracked by a single handle. Each tick spawns one
//! fetch; a tick that fires while the previous fetch is still pending is
//! skipped, so at most one fetch is ever outstanding. Results are applied only
//! if the session that started the loop is still the active one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AlertConfig;
use crate::error::PollError;
use crate::metrics::MetricsSnapshot;
use crate::remote::{with_timeout, RemoteService};

/// Identifies the currently active session. Zero means none.
///
/// Opening and closing happen under the write lock of the metrics channel,
/// the same lock [`apply`] checks the epoch under, so a result can never be
/// published for a session that has already been closed.
#[derive(Clone, Default)]
pub struct ActiveSession(Arc<AtomicU64>);

impl ActiveSession {
    /// Makes `epoch` the active session and clears the previous snapshot.
    pub fn open(&self, epoch: u64, latest: &watch::Sender<Option<MetricsSnapshot>>) {
        latest.send_if_modified(|slot| {
            self.0.store(epoch, Ordering::SeqCst);
            slot.take().is_some()
        });
    }

    pub fn close(&self, latest: &watch::Sender<Option<MetricsSnapshot>>) {
        latest.send_if_modified(|_| {
            self.0.store(0, Ordering::SeqCst);
            false
        });
    }

    pub fn is(&self, epoch: u64) -> bool {
        epoch != 0 && self.0.load(Ordering::SeqCst) == epoch
    }
}

/// Per-loop poll counters. Every start gets a fresh set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PollCounters {
    pub applied: u64,
    pub failed: u64,
    /// Ticks skipped because the previous fetch had not resolved.
    pub skipped: u64,
    /// Fetches that completed after their session ended.
    pub discarded: u64,
    pub peak_risk: f64,
}

/// Everything a running loop needs to fetch and publish metrics.
#[derive(Clone)]
pub struct PollTarget {
    pub remote: Arc<dyn RemoteService>,
    pub latest: watch::Sender<Option<MetricsSnapshot>>,
    pub session: ActiveSession,
    pub epoch: u64,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Copy)]
struct PollSettings {
    request_timeout: Duration,
    thresholds: AlertConfig,
}

pub struct PollingLoop {
    interval: Duration,
    settings: PollSettings,
    timer: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<Mutex<PollCounters>>,
}

impl PollingLoop {
    pub fn new(interval: Duration, request_timeout: Duration, thresholds: AlertConfig) -> Self {
        Self {
            interval,
            settings: PollSettings { request_timeout, thresholds },
            timer: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Mutex::new(PollCounters::default())),
        }
    }

    /// Starts the timer. Returns `false` without doing anything if a timer is
    /// already running.
    pub fn start(&mut self, target: PollTarget) -> bool {
        if self.timer.is_some() {
            warn!("polling already running; refusing to start a second timer");
            return false;
        }

        // Fetches left over from a previous run keep the old counters.
        self.counters = Arc::new(Mutex::new(PollCounters::default()));

        let period = self.interval;
        let settings = self.settings;
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let first_tick = Instant::now() + period;

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                if in_flight.swap(true, Ordering::SeqCst) {
                    counters.lock().skipped += 1;
                    debug!("previous metrics fetch still pending; skipping tick");
                    continue;
                }

                let target = target.clone();
                let guard = InFlightGuard(Arc::clone(&in_flight));
                let counters = Arc::clone(&counters);
                // Fetches run in their own task so nothing they do can take
                // the timer down with them.
                tokio::spawn(async move {
                    let _guard = guard;
                    match poll_once(&target, settings).await {
                        Ok(snapshot) => apply(&target, snapshot, &counters),
                        Err(e) => {
                            counters.lock().failed += 1;
                            warn!("{e}");
                        }
                    }
                });
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "polling started");
        true
    }

    /// Cancels the timer. No tick fires after this returns; a fetch already in
    /// flight may still complete but its result is discarded by the session
    /// check. Returns `false` if nothing was running.
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(handle) => {
                handle.abort();
                debug!("polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn counters(&self) -> PollCounters {
        *self.counters.lock()
    }
}

impl Drop for PollingLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn poll_once(target: &PollTarget, settings: PollSettings) -> Result<MetricsSnapshot, PollError> {
    let payload = with_timeout(settings.request_timeout, target.remote.fetch_metrics()).await?;
    let snapshot = MetricsSnapshot::from_payload(payload, &settings.thresholds, target.clock.now())?;
    Ok(snapshot)
}

fn apply(target: &PollTarget, snapshot: MetricsSnapshot, counters: &Mutex<PollCounters>) {
    let applied = target.latest.send_if_modified(|slot| {
        if !target.session.is(target.epoch) {
            return false;
        }

        let previous = slot.as_ref().map(|s| s.alert_level);
        if previous != Some(snapshot.alert_level) {
            info!(
                risk = snapshot.risk_score,
                level = snapshot.alert_level.as_str(),
                "alert level changed"
            );
        }
        {
            let mut c = counters.lock();
            c.applied += 1;
            c.peak_risk = c.peak_risk.max(snapshot.risk_score);
        }
        *slot = Some(snapshot);
        true
    });

    if !applied {
        counters.lock().discarded += 1;
        debug!(epoch = target.epoch, "discarding metrics from a session that has ended");
    }
}
