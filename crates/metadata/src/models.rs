//! Database models mapping to the metadata schema.

use hopper_core::job::{JobState, JobStats, RowError};
use hopper_core::upload::UploadState;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Chunked upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub session_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub total_chunks: i64,
    pub state: String,
    /// Set once every ordinal has been received and the file assembled.
    pub file_id: Option<Uuid>,
    /// The ordinal whose arrival completed the set.
    pub completing_ordinal: Option<i64>,
    pub error_detail: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadSessionRow {
    pub fn new(
        session_id: &str,
        file_name: &str,
        file_size: u64,
        total_chunks: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_name: file_name.to_string(),
            file_size: file_size as i64,
            total_chunks: i64::from(total_chunks),
            state: UploadState::Open.as_str().to_string(),
            file_id: None,
            completing_ordinal: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed session state; unknown values read as failed.
    pub fn upload_state(&self) -> UploadState {
        UploadState::parse(&self.state).unwrap_or(UploadState::Failed)
    }
}

// =============================================================================
// Assembled files
// =============================================================================

/// A complete file available for processing.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub file_name: String,
    pub size_bytes: i64,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    pub object_key: String,
    /// Upload session the file was assembled from; None for whole-file uploads.
    pub session_id: Option<String>,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Import jobs
// =============================================================================

/// Import job record.
#[derive(Debug, Clone, FromRow)]
pub struct ImportJobRow {
    pub job_id: Uuid,
    pub file_id: Uuid,
    pub state: String,
    pub total: i64,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub errors: i64,
    pub message: String,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl ImportJobRow {
    /// A fresh job in the queued state.
    pub fn queued(job_id: Uuid, file_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            job_id,
            file_id,
            state: JobState::Queued.as_str().to_string(),
            total: 0,
            processed: 0,
            created: 0,
            updated: 0,
            errors: 0,
            message: String::new(),
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Parsed job state; unknown values read as failed.
    pub fn job_state(&self) -> JobState {
        JobState::parse(&self.state).unwrap_or(JobState::Failed)
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            total: self.total.max(0) as u64,
            processed: self.processed.max(0) as u64,
            created: self.created.max(0) as u64,
            updated: self.updated.max(0) as u64,
            errors: self.errors.max(0) as u64,
        }
    }
}

/// One recorded row error of a job.
#[derive(Debug, Clone, FromRow)]
pub struct JobErrorRow {
    pub job_id: Uuid,
    pub row_number: i64,
    pub identifier: String,
    pub message: String,
}

impl JobErrorRow {
    pub fn from_row_error(job_id: Uuid, error: &RowError) -> Self {
        Self {
            job_id,
            row_number: error.row as i64,
            identifier: error.identifier.clone(),
            message: error.message.clone(),
        }
    }

    pub fn to_row_error(&self) -> RowError {
        RowError {
            row: self.row_number.max(0) as u64,
            identifier: self.identifier.clone(),
            message: self.message.clone(),
        }
    }
}

/// A progress write applied atomically to a processing job.
#[derive(Debug, Clone)]
pub struct JobProgressUpdate {
    pub stats: JobStats,
    /// Row errors recorded since the previous flush.
    pub new_errors: Vec<JobErrorRow>,
}

/// The final write that moves a job into a terminal state.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub state: JobState,
    pub message: String,
    pub progress: JobProgressUpdate,
    pub finished_at: OffsetDateTime,
}

/// Job row plus its errors, read in one transaction.
#[derive(Debug, Clone)]
pub struct JobSnapshotRow {
    pub job: ImportJobRow,
    pub errors: Vec<JobErrorRow>,
}

// =============================================================================
// Imported records
// =============================================================================

/// A record upserted by an import, keyed by its identifier.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub identifier: String,
    /// Column values as a JSON object.
    pub data_json: String,
    /// Job that last wrote the record.
    pub job_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
