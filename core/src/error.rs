use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigLoadError;

pub type Result<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// The stream could not be opened or broke mid-flight.
    #[error("stream transport failed: {0}")]
    Transport(String),

    /// The collaborator answered with a non-success status.
    #[error("collaborator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The collaborator sent an `error` event.
    #[error("collaborator reported an error: {0}")]
    Protocol(String),

    /// No chunk arrived within the configured idle timeout.
    #[error("stream stalled for {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error("failed to encode request body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Caller misuse of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("handle was destroyed")]
    Destroyed,

    #[error("a narration build is already loading on this handle")]
    BuildInProgress,

    #[error("a chat response is still streaming")]
    AlreadyStreaming,

    #[error("timeline has no snapshots")]
    NoSnapshots,
}

/// Shown when a collaborator sends an `error` event without any text.
pub const UNSPECIFIED_PROTOCOL_ERROR: &str = "The assistant reported an error without details.";

impl ReplayError {
    /// A collaborator `error` event. Blank text falls back to
    /// [`UNSPECIFIED_PROTOCOL_ERROR`] so the user always sees something.
    pub fn protocol(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            ReplayError::Protocol(UNSPECIFIED_PROTOCOL_ERROR.to_string())
        } else {
            ReplayError::Protocol(message)
        }
    }

    /// Failures that leave the handle usable after a retry, reset or seek.
    /// Only configuration errors require fixing input first.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReplayError::Config(_) | ReplayError::Serialize(_))
    }

    /// Text shown inline in an assistant message or narration banner.
    pub fn user_message(&self) -> String {
        match self {
            ReplayError::Protocol(message) => message.clone(),
            ReplayError::Timeout(_) => "The response stalled. Please try again.".to_string(),
            ReplayError::Http { status, .. } => format!("Request failed (HTTP {status})."),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ReplayError {
    fn from(err: reqwest::Error) -> Self {
        ReplayError::Transport(err.to_string())
    }
}
