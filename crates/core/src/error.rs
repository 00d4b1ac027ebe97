//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file too large: {size} bytes (maximum {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid transfer policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown state: {0}")]
    UnknownState(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
