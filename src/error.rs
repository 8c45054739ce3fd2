use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// Failures that end (or refuse to start) a live session.
///
/// None of these are retried. The orchestrator surfaces each as a `system`
/// log entry and tears the session down to `Disconnected`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Microphone or speaker could not be opened (permission, missing hardware).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote session failed to open, closed unexpectedly, or reported an error.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An inbound audio chunk could not be decoded.
    #[error("audio decode failed: {0}")]
    DecodeFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::TransportFailure(err.to_string())
    }
}

impl From<base64::DecodeError> for AgentError {
    fn from(err: base64::DecodeError) -> Self {
        AgentError::DecodeFailure(err.to_string())
    }
}
