use thiserror::Error;

use crate::error::{LifecycleError, RemoteError};
use crate::remote::Artifact;
use crate::violations::{ClipboardEvent, ViolationKind};

/// Source element reported for clipboard events typed at the console.
const CONSOLE_SOURCE: &str = "console";

pub enum ConsoleEvent {
    /// Operator asked to begin a proctoring session.
    StartRequested,
    /// Operator asked to end the active session.
    StopRequested,
    /// Operator asked for a screenshot of the current frame.
    SnapshotRequested,
    /// A start or stop request failed. Already logged and notified.
    LifecycleFailed(LifecycleError),
    /// A screenshot request finished, successfully or not.
    SnapshotFinished(Result<Artifact, RemoteError>),
    HealthRequested,
    StatsRequested,
    ClearRequested,
    /// A simulated clipboard action in the exam document.
    Clipboard(ClipboardEvent),
    /// `quit`, end of input, or Ctrl+C; stop any session and exit.
    Shutdown,
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{0} needs some text, e.g. `{0} hello`")]
    MissingText(&'static str),
}

/// Parses one line typed at the console. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleEvent>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    let event = match word.to_ascii_lowercase().as_str() {
        "start" => ConsoleEvent::StartRequested,
        "stop" => ConsoleEvent::StopRequested,
        "snapshot" | "screenshot" => ConsoleEvent::SnapshotRequested,
        "health" => ConsoleEvent::HealthRequested,
        "stats" => ConsoleEvent::StatsRequested,
        "clear" => ConsoleEvent::ClearRequested,
        "copy" => clipboard(ViolationKind::Copy, "copy", rest)?,
        "cut" => clipboard(ViolationKind::Cut, "cut", rest)?,
        "paste" => clipboard(ViolationKind::Paste, "paste", rest)?,
        "menu" => ConsoleEvent::Clipboard(ClipboardEvent::new(
            ViolationKind::ContextMenu,
            "",
            CONSOLE_SOURCE,
        )),
        "quit" | "exit" => ConsoleEvent::Shutdown,
        _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(Some(event))
}

fn clipboard(
    kind: ViolationKind,
    word: &'static str,
    text: &str,
) -> Result<ConsoleEvent, CommandError> {
    if text.is_empty() {
        return Err(CommandError::MissingText(word));
    }
    Ok(ConsoleEvent::Clipboard(ClipboardEvent::new(kind, text, CONSOLE_SOURCE)))
}
