//! Serialized user-facing notifications.
//!
//! Any component can enqueue a [`NotificationRequest`] through a cloned
//! [`Notifier`]. A single worker task owns the display slot and shows one
//! request at a time in strict FIFO order: show, wait out the request's
//! duration, dismiss, wait the transition delay, then move on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub message: String,
    pub severity: Severity,
    pub duration: Duration,
}

impl NotificationRequest {
    pub fn new(message: impl Into<String>, severity: Severity, duration: Duration) -> Self {
        Self {
            message: message.into(),
            severity,
            duration,
        }
    }
}

/// Whatever renders the visible notification slot.
pub trait NotificationDisplay: Send + Sync + 'static {
    fn show(&self, request: &NotificationRequest);
    fn dismiss(&self, request: &NotificationRequest);
}

/// Display that writes notifications to the log. Used by the console binary.
pub struct TracingDisplay;

impl NotificationDisplay for TracingDisplay {
    fn show(&self, request: &NotificationRequest) {
        let message = request.message.as_str();
        match request.severity {
            Severity::Info | Severity::Success => {
                info!(severity = request.severity.as_str(), "{message}")
            }
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }

    fn dismiss(&self, request: &NotificationRequest) {
        debug!(message = request.message.as_str(), "notification dismissed");
    }
}

/// Cheap, cloneable handle for enqueueing notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<NotificationRequest>,
    durations: NotificationConfig,
}

impl Notifier {
    /// Appends `request` to the queue. Never blocks; a request enqueued after
    /// the queue shut down is dropped.
    pub fn enqueue(&self, request: NotificationRequest) {
        if self.tx.send(request).is_err() {
            debug!("notification queue closed; dropping request");
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(message, Severity::Info, self.durations.info_ms);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(message, Severity::Success, self.durations.success_ms);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(message, Severity::Warning, self.durations.warning_ms);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(message, Severity::Error, self.durations.error_ms);
    }

    /// High-visibility warning that stays up longer than an ordinary one.
    pub fn integrity_alert(&self, message: impl Into<String>) {
        self.notify(message, Severity::Warning, self.durations.integrity_alert_ms);
    }

    fn notify(&self, message: impl Into<String>, severity: Severity, duration_ms: u64) {
        self.enqueue(NotificationRequest::new(
            message,
            severity,
            Duration::from_millis(duration_ms),
        ));
    }
}

#[cfg(test)]
impl Notifier {
    /// A notifier with no worker behind it. Requests collect in the receiver.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<NotificationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Notifier {
            tx,
            durations: NotificationConfig::default(),
        };
        (notifier, rx)
    }
}

/// Owner of the single display slot.
pub struct NotificationQueue {
    notifier: Notifier,
    showing: watch::Receiver<Option<NotificationRequest>>,
    worker: JoinHandle<()>,
}

impl NotificationQueue {
    /// Spawns the display worker. Must be called from within a tokio runtime.
    pub fn start(display: Arc<dyn NotificationDisplay>, config: &NotificationConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (slot_tx, slot_rx) = watch::channel(None);
        let transition = Duration::from_millis(config.transition_ms);

        let worker = tokio::spawn(run_display(rx, display, slot_tx, transition));

        Self {
            notifier: Notifier {
                tx,
                durations: config.clone(),
            },
            showing: slot_rx,
            worker,
        }
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Watches the request currently visible, if any.
    pub fn subscribe_showing(&self) -> watch::Receiver<Option<NotificationRequest>> {
        self.showing.clone()
    }

    /// Stops the worker. Anything still queued is discarded.
    pub fn shutdown(self) {
        self.worker.abort();
    }
}

async fn run_display(
    mut rx: mpsc::UnboundedReceiver<NotificationRequest>,
    display: Arc<dyn NotificationDisplay>,
    slot: watch::Sender<Option<NotificationRequest>>,
    transition: Duration,
) {
    while let Some(request) = rx.recv().await {
        slot.send_replace(Some(request.clone()));
        display.show(&request);

        tokio::time::sleep(request.duration).await;

        display.dismiss(&request);
        slot.send_replace(None);

        tokio::time::sleep(transition).await;
    }
}
