//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Failure of one HTTP exchange with the import server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server refused the payload size (413).
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Any other 4xx. Repeating the same request will not help.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// HTTP status of a rejected request, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::PayloadTooLarge(_) => Some(413),
            Self::Rejected { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why an import stopped before a job reached a terminal state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk kept failing after every retry.
    #[error("transfer failed: {0}")]
    Transfer(TransportError),

    #[error("server could not assemble the file: {0}")]
    Assembly(String),

    #[error("could not start processing: {0}")]
    JobStart(String),

    #[error("job status unavailable after {failures} consecutive failed polls: {last_error}")]
    StatusUnavailable { failures: u32, last_error: String },

    #[error("job status request failed: {0}")]
    Status(TransportError),

    #[error("import cancelled")]
    Cancelled,
}

impl From<hopper_core::Error> for PipelineError {
    fn from(e: hopper_core::Error) -> Self {
        match e {
            hopper_core::Error::FileTooLarge { size, max } => {
                Self::FileTooLarge(format!("{size} bytes exceeds the {max} byte limit"))
            }
            other => Self::InvalidFile(other.to_string()),
        }
    }
}
