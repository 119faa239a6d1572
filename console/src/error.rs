use thiserror::Error;

/// Failure talking to the remote analysis service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The request did not complete within the configured timeout.
    #[error("request timeout")]
    Timeout,

    #[error("server returned status {status}")]
    Status { status: u16 },

    /// The server answered but refused the operation.
    #[error("rejected by server: {reason}")]
    Rejected { reason: String },

    #[error("connection failed: {reason}")]
    Transport { reason: String },

    #[error("malformed response: {reason}")]
    Malformed { reason: String },
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RemoteError::Timeout
        } else if let Some(status) = error.status() {
            RemoteError::Status { status: status.as_u16() }
        } else if error.is_decode() {
            RemoteError::Malformed { reason: error.to_string() }
        } else {
            RemoteError::Transport { reason: error.to_string() }
        }
    }
}

/// A start or stop request that was rejected or could not reach the service.
/// These are the only errors that change session state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("failed to start session: {0}")]
    Start(RemoteError),

    #[error("failed to stop session: {0}")]
    Stop(RemoteError),
}

/// A single metrics fetch failed. Logged and retried on the next tick.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("metrics poll failed: {0}")]
pub struct PollError(#[from] pub RemoteError);

/// The secondary text analysis of pasted content failed. Logged only.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("text analysis failed: {0}")]
pub struct AnalysisError(#[from] pub RemoteError);

/// Invalid configuration, rejected before any component is constructed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}
