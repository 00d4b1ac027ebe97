//! HTTP server for the hopper import pipeline.
//!
//! This crate provides the server side of a bulk spreadsheet import:
//! - Whole-file and chunked upload endpoints
//! - Chunk assembly into complete files
//! - Background import jobs that parse, validate and upsert rows
//! - Job status polling
//! - Expiry of abandoned upload sessions

pub mod assembler;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod processor;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use assembler::ChunkAssembler;
pub use error::ApiError;
pub use processor::ImportJobProcessor;
pub use routes::create_router;
pub use state::AppState;
