//! Imported record repository.

use crate::error::MetadataResult;
use crate::models::RecordRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Whether an upsert inserted a new record or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Created,
    Updated,
}

/// Repository for records written by imports.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Insert or replace the record keyed by `identifier`.
    async fn upsert_record(
        &self,
        identifier: &str,
        data_json: &str,
        job_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> MetadataResult<UpsertKind>;

    /// Get a record by identifier.
    async fn get_record(&self, identifier: &str) -> MetadataResult<Option<RecordRow>>;

    /// Total number of records.
    async fn count_records(&self) -> MetadataResult<u64>;
}
