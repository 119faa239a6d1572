mod clock;
mod config;
mod error;
mod event;
mod http_client;
mod metrics;
mod notifications;
mod paths;
mod polling;
mod remote;
mod ring_buffer;
mod session;
mod status;
mod violations;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::SystemClock;
use crate::event::ConsoleEvent;
use crate::http_client::HttpRemote;
use crate::notifications::{NotificationQueue, TracingDisplay};
use crate::session::{SessionController, SessionState};
use crate::violations::DocumentEvents;

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator console for AI-assisted exam proctoring")]
struct Args {
    /// Config file to load. Defaults to config.toml in the application directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `service.base_url` from the config file.
    #[arg(long)]
    base_url: Option<String>,

    /// Status file for dashboards. Defaults to status.toml next to the config.
    #[arg(long)]
    status_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proctor_console=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match args.config {
        Some(path) => path,
        None => paths::config_file_path()?,
    };
    let config = config::load(&config_path, args.base_url)?;

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = args
        .status_file
        .unwrap_or_else(|| config_path.with_file_name(paths::STATUS_FILE_NAME));
    let mut current_status = status::ConsoleStatus::new();
    status::write_status(&status_path, &current_status);

    // ── Session controller ────────────────────────────────────────────────────
    let remote = HttpRemote::new(&config.service).context("failed to build HTTP client")?;
    let queue = NotificationQueue::start(Arc::new(TracingDisplay), &config.notifications);
    let document = DocumentEvents::new();
    let controller = Arc::new(
        SessionController::new(
            &config,
            Arc::new(remote),
            queue.notifier(),
            document.clone(),
            Arc::new(SystemClock),
        )
        .context("invalid configuration")?,
    );

    let mut state_rx = controller.subscribe_state();
    let mut transitions_rx = controller.subscribe_transitions();
    let mut showing_rx = queue.subscribe_showing();
    let mut metrics_rx = controller.subscribe_metrics();
    let mut connectivity_rx = controller.subscribe_connectivity();
    let mut violations_rx = controller.subscribe_violations();

    let (event_tx, mut event_rx) = mpsc::channel::<ConsoleEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(read_commands(event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(ConsoleEvent::Shutdown).await;
            }
        });
    }

    let _ = event_tx.send(ConsoleEvent::HealthRequested).await;

    info!(
        service = config.service.base_url.as_str(),
        status = %status_path.display(),
        "proctor-console v{} started",
        env!("CARGO_PKG_VERSION")
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            Some(evt) = event_rx.recv() => match evt {
                ConsoleEvent::StartRequested => {
                    let controller = Arc::clone(&controller);
                    let tx = event_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = controller.start().await {
                            let _ = tx.send(ConsoleEvent::LifecycleFailed(e)).await;
                        }
                    });
                }

                ConsoleEvent::StopRequested => {
                    let controller = Arc::clone(&controller);
                    let tx = event_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = controller.stop().await {
                            let _ = tx.send(ConsoleEvent::LifecycleFailed(e)).await;
                        }
                    });
                }

                ConsoleEvent::LifecycleFailed(e) => {
                    current_status.error = Some(e.to_string());
                    status::write_status(&status_path, &current_status);
                }

                ConsoleEvent::SnapshotRequested => {
                    let controller = Arc::clone(&controller);
                    let tx = event_tx.clone();
                    tokio::spawn(async move {
                        let result = controller.take_snapshot().await;
                        let _ = tx.send(ConsoleEvent::SnapshotFinished(result)).await;
                    });
                }

                ConsoleEvent::SnapshotFinished(result) => {
                    match result {
                        Ok(artifact) => {
                            current_status.last_artifact = Some(artifact.name);
                            current_status.error = None;
                        }
                        Err(e) => current_status.error = Some(format!("Screenshot failed: {e}")),
                    }
                    status::write_status(&status_path, &current_status);
                }

                ConsoleEvent::HealthRequested => {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        controller.check_remote_health().await;
                    });
                }

                ConsoleEvent::StatsRequested => {
                    let mode = controller.mode();
                    info!(
                        state = controller.state().as_str(),
                        connectivity = controller.connectivity().as_str(),
                        mode = mode.as_deref().unwrap_or("-"),
                        "session"
                    );
                    if let Some(summary) = controller.last_summary() {
                        info!(
                            mode = summary.mode.as_str(),
                            duration_secs = summary.duration().num_seconds(),
                            violations = summary.violations,
                            peak_risk = summary.polls.peak_risk,
                            "last session"
                        );
                    }
                    let stats = controller.violation_stats();
                    info!(
                        total = stats.total,
                        copy = stats.by_kind.copy,
                        cut = stats.by_kind.cut,
                        paste = stats.by_kind.paste,
                        context_menu = stats.by_kind.context_menu,
                        "violation stats"
                    );
                    for record in &stats.recent {
                        info!(
                            at = %record.timestamp.to_rfc3339(),
                            kind = record.kind.as_str(),
                            length = record.text_length,
                            "  {}",
                            record.text_preview
                        );
                    }
                    if let Some(m) = controller.latest_metrics() {
                        info!(
                            risk = m.risk_score,
                            level = m.alert_level.as_str(),
                            gaze = m.gaze_level,
                            persons = m.person_count,
                            items = m.prohibited_items.len(),
                            frames = m.frames_processed,
                            "latest metrics"
                        );
                    }
                }

                ConsoleEvent::ClearRequested => {
                    controller.clear_violations();
                    current_status.violations = controller.violation_stats().total;
                    status::write_status(&status_path, &current_status);
                }

                ConsoleEvent::Clipboard(clipboard) => {
                    if document.dispatch(clipboard) == 0 {
                        info!("no session is monitoring the document; event ignored");
                    }
                }

                ConsoleEvent::Shutdown => {
                    info!("shutting down");
                    if controller.state() == SessionState::Active {
                        // Errors are already logged and notified by the controller.
                        let _ = controller.stop().await;
                    }
                    current_status.state = controller.state();
                    current_status.mode = None;
                    current_status.apply_metrics(None);
                    status::write_status(&status_path, &current_status);
                    break;
                }
            },

            Ok(()) = state_rx.changed() => {
                let state = *state_rx.borrow_and_update();
                current_status.state = state;
                current_status.mode = controller.mode();
                if state == SessionState::Active {
                    current_status.error = None;
                }
                status::write_status(&status_path, &current_status);
            }

            received = transitions_rx.recv() => {
                match received {
                    Ok(change) => info!(
                        from = change.from.as_str(),
                        to = change.to.as_str(),
                        "session state changed"
                    ),
                    Err(RecvError::Lagged(n)) => warn!("missed {n} session state changes"),
                    Err(RecvError::Closed) => break,
                }
            }

            Ok(()) = showing_rx.changed() => {
                current_status.notification =
                    showing_rx.borrow_and_update().as_ref().map(|r| r.message.clone());
                status::write_status(&status_path, &current_status);
            }

            Ok(()) = metrics_rx.changed() => {
                let snapshot = metrics_rx.borrow_and_update().clone();
                current_status.apply_metrics(snapshot.as_ref());
                status::write_status(&status_path, &current_status);
            }

            Ok(()) = connectivity_rx.changed() => {
                current_status.connectivity = *connectivity_rx.borrow_and_update();
                status::write_status(&status_path, &current_status);
            }

            received = violations_rx.recv() => {
                match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        current_status.violations = controller.violation_stats().total;
                        status::write_status(&status_path, &current_status);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    queue.shutdown();
    Ok(())
}

/// Reads operator commands from stdin until EOF, which counts as `quit`.
async fn read_commands(tx: mpsc::Sender<ConsoleEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) => match event::parse_command(&line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{e}");
                    continue;
                }
            },
            Ok(None) => ConsoleEvent::Shutdown,
            Err(e) => {
                warn!("failed to read stdin: {e}");
                ConsoleEvent::Shutdown
            }
        };
        let done = matches!(event, ConsoleEvent::Shutdown);
        if tx.send(event).await.is_err() || done {
            break;
        }
    }
}
