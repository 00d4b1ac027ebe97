//! Record persistence.

use super::validator::Record;
use async_trait::async_trait;
use hopper_core::job::JobId;
use hopper_metadata::repos::UpsertKind;
use hopper_metadata::{MetadataError, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;

/// Failure to write one record.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The record itself is unacceptable; recorded as a row error.
    #[error("{0}")]
    Rejected(String),

    /// The store cannot take writes; the job stops.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Destination of validated records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn upsert(&self, record: &Record, job_id: JobId) -> Result<UpsertKind, SinkError>;
}

/// Writes records into the metadata database's `import_records` table.
pub struct SqliteRecordSink {
    metadata: Arc<dyn MetadataStore>,
}

impl SqliteRecordSink {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn upsert(&self, record: &Record, job_id: JobId) -> Result<UpsertKind, SinkError> {
        let data_json = serde_json::to_string(&record.fields)
            .map_err(|e| SinkError::Rejected(format!("unserializable record: {e}")))?;

        self.metadata
            .upsert_record(
                &record.identifier,
                &data_json,
                Some(*job_id.as_uuid()),
                OffsetDateTime::now_utc(),
            )
            .await
            .map_err(|e| match e {
                MetadataError::Constraint(msg) => SinkError::Rejected(msg),
                other => SinkError::Unavailable(other.to_string()),
            })
    }
}
