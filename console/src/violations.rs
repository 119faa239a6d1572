//! Clipboard violation recording.
//!
//! While attached, the recorder is a listener on the document: every
//! qualifying clipboard event is recorded inside `dispatch`, appended to a
//! bounded log and published to subscribers. Long pastes are additionally sent
//! for text analysis in the background.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ViolationConfig;
use crate::error::AnalysisError;
use crate::notifications::Notifier;
use crate::remote::{with_timeout, RemoteService};
use crate::ring_buffer::RingBuffer;

const RECORD_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    Copy,
    Cut,
    Paste,
    ContextMenu,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::Copy => "COPY",
            ViolationKind::Cut => "CUT",
            ViolationKind::Paste => "PASTE",
            ViolationKind::ContextMenu => "CONTEXT_MENU",
        }
    }
}

/// A clipboard-class event raised somewhere in the exam document.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardEvent {
    pub kind: ViolationKind,
    /// Selected text for copy/cut, clipboard contents for paste, empty for
    /// context menu.
    pub text: String,
    /// Description of the element the event fired on, e.g. `textarea#answer-3`.
    pub source: String,
}

impl ClipboardEvent {
    pub fn new(kind: ViolationKind, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Document-scope event source. Anything that observes the page dispatches
/// clipboard events here; attached recorders handle them before `dispatch`
/// returns.
#[derive(Clone, Default)]
pub struct DocumentEvents {
    listeners: Arc<Mutex<Vec<Arc<RecorderInner>>>>,
}

impl DocumentEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every attached listener. Returns the number of
    /// listeners that handled it.
    pub fn dispatch(&self, event: ClipboardEvent) -> usize {
        // Held while recording so a detach cannot interleave with delivery.
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener.record(event.clone());
        }
        listeners.len()
    }

    fn attach(&self, listener: &Arc<RecorderInner>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, listener)) {
            return false;
        }
        listeners.push(Arc::clone(listener));
        true
    }

    fn detach(&self, listener: &Arc<RecorderInner>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub kind: ViolationKind,
    pub timestamp: DateTime<Utc>,
    /// Length of the captured text in characters.
    pub text_length: usize,
    pub text_preview: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub copy: u64,
    pub cut: u64,
    pub paste: u64,
    pub context_menu: u64,
}

impl KindCounts {
    fn increment(&mut self, kind: ViolationKind) {
        let slot = match kind {
            ViolationKind::Copy => &mut self.copy,
            ViolationKind::Cut => &mut self.cut,
            ViolationKind::Paste => &mut self.paste,
            ViolationKind::ContextMenu => &mut self.context_menu,
        };
        *slot += 1;
    }
}

/// Read-only summary returned by [`ViolationRecorder::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationStats {
    /// Violations recorded since the last clear, including evicted ones.
    pub total: u64,
    pub by_kind: KindCounts,
    /// Most recent records, oldest first.
    pub recent: Vec<ViolationRecord>,
}

/// Sends long pastes to the service's text analysis endpoint.
#[derive(Clone)]
pub struct PasteAnalyzer {
    pub remote: Arc<dyn RemoteService>,
    pub notifier: Notifier,
    pub timeout: Duration,
}

impl PasteAnalyzer {
    async fn analyze(&self, text: String) -> Result<(), AnalysisError> {
        let verdict = with_timeout(self.timeout, self.remote.analyze_text(&text)).await?;
        debug!(
            machine_generated = verdict.likely_machine_generated,
            confidence = verdict.confidence,
            "paste analysed"
        );
        if verdict.likely_machine_generated {
            self.notifier.integrity_alert(format!(
                "Pasted text appears to be AI-generated ({:.0}% confidence)",
                verdict.confidence * 100.0
            ));
        }
        Ok(())
    }
}

struct ViolationLog {
    records: RingBuffer<ViolationRecord>,
    counts: KindCounts,
    total: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

struct RecorderInner {
    settings: ViolationConfig,
    log: Mutex<ViolationLog>,
    records_tx: broadcast::Sender<ViolationRecord>,
    clock: Arc<dyn Clock>,
    analyzer: Option<PasteAnalyzer>,
}

impl RecorderInner {
    fn qualifies(&self, event: &ClipboardEvent) -> bool {
        match event.kind {
            ViolationKind::Copy | ViolationKind::Cut | ViolationKind::Paste => true,
            ViolationKind::ContextMenu => self.settings.monitor_context_menu,
        }
    }

    fn record(&self, event: ClipboardEvent) -> Option<ViolationRecord> {
        if !self.qualifies(&event) {
            return None;
        }

        let text_length = event.text.chars().count();
        let text_preview: String = event.text.chars().take(self.settings.preview_chars).collect();

        let record = {
            let mut log = self.log.lock();
            // Timestamps never run backwards within a log, even if the wall
            // clock does.
            let now = self.clock.now();
            let timestamp = match log.last_timestamp {
                Some(last) if last > now => last,
                _ => now,
            };
            let record = ViolationRecord {
                kind: event.kind,
                timestamp,
                text_length,
                text_preview,
                source: event.source,
            };
            log.records.push(record.clone());
            log.counts.increment(record.kind);
            log.total += 1;
            log.last_timestamp = Some(timestamp);
            record
        };

        info!(
            kind = record.kind.as_str(),
            length = record.text_length,
            source = record.source.as_str(),
            "clipboard violation recorded"
        );
        // No subscribers is fine.
        let _ = self.records_tx.send(record.clone());

        if record.kind == ViolationKind::Paste
            && self.settings.analyze_pastes
            && text_length > self.settings.analysis_threshold_chars
        {
            if let Some(analyzer) = self.analyzer.clone() {
                let text = event.text;
                tokio::spawn(async move {
                    if let Err(e) = analyzer.analyze(text).await {
                        warn!("{e}");
                    }
                });
            }
        }

        Some(record)
    }
}

/// Records clipboard violations while attached to the document.
pub struct ViolationRecorder {
    inner: Arc<RecorderInner>,
    document: DocumentEvents,
}

impl ViolationRecorder {
    pub fn new(
        settings: &ViolationConfig,
        document: DocumentEvents,
        clock: Arc<dyn Clock>,
        analyzer: Option<PasteAnalyzer>,
    ) -> Self {
        let (records_tx, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RecorderInner {
                settings: settings.clone(),
                log: Mutex::new(ViolationLog {
                    records: RingBuffer::new(settings.capacity),
                    counts: KindCounts::default(),
                    total: 0,
                    last_timestamp: None,
                }),
                records_tx,
                clock,
                analyzer,
            }),
            document,
        }
    }

    /// Attaches to the document. Returns `false` if already attached.
    pub fn start(&self) -> bool {
        let attached = self.document.attach(&self.inner);
        if attached {
            debug!("clipboard listeners attached");
        }
        attached
    }

    /// Detaches from the document. No event dispatched after this returns is
    /// recorded; every event dispatched before it already has been. Returns
    /// `false` if not attached.
    pub fn stop(&self) -> bool {
        let detached = self.document.detach(&self.inner);
        if detached {
            debug!("clipboard listeners detached");
        }
        detached
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViolationRecord> {
        self.inner.records_tx.subscribe()
    }

    pub fn stats(&self) -> ViolationStats {
        let log = self.inner.log.lock();
        ViolationStats {
            total: log.total,
            by_kind: log.counts,
            recent: log
                .records
                .latest(self.inner.settings.recent_count)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    pub fn clear(&self) {
        let mut log = self.inner.log.lock();
        log.records.clear();
        log.counts = KindCounts::default();
        log.total = 0;
    }
}

impl Drop for ViolationRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}
