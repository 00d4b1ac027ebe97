//! Assembled file repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for complete files handed to the import processor.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Record an assembled file.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a file by ID.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;
}
