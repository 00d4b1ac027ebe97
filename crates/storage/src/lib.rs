//! Object storage abstraction and backends for hopper.
//!
//! This crate provides:
//! - Atomic writes of chunk parts and assembled files
//! - Streaming writes for concatenating parts without buffering the whole file
//! - Prefix listing and deletion for session cleanup
//! - Backend: local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectStore, StreamingUpload};

use hopper_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
