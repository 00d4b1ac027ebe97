//! Core domain types and shared logic for the hopper import pipeline.
//!
//! This crate defines the data model used across all other crates:
//! - Session, file and job identifiers
//! - Transfer planning (single-shot vs. chunked) and chunk boundaries
//! - Progress accounting for transfers and jobs
//! - Import job state, statistics and row errors
//! - HTTP wire types shared by server and client
//! - Configuration and policy constants

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod job;
pub mod progress;
pub mod upload;

pub use chunk::{ChunkRange, TransferPlan};
pub use config::TransferPolicy;
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use job::{JobId, JobSnapshot, JobState, JobStats, RowError, UploadOutcome};
pub use progress::ProgressTracker;
pub use upload::{FileId, SessionId};

/// Default single-shot threshold: 5 MiB.
pub const DEFAULT_SINGLE_SHOT_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default maximum file size: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default server-side maximum chunk size: 8 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
