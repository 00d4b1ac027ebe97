//! Import job repository.

use crate::error::MetadataResult;
use crate::models::{ImportJobRow, JobCompletion, JobProgressUpdate, JobSnapshotRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for import jobs and their row errors.
///
/// Every state change is a conditional update: a job only moves
/// `queued -> processing -> completed|failed`, and a terminal job is never
/// written again.
#[async_trait]
pub trait ImportJobRepo: Send + Sync {
    /// Create a queued job.
    ///
    /// Fails with `MetadataError::Constraint` if the file already has an
    /// active (queued or processing) job.
    async fn create_job(&self, job: &ImportJobRow) -> MetadataResult<()>;

    /// Get a job row by ID.
    async fn get_job(&self, job_id: Uuid) -> MetadataResult<Option<ImportJobRow>>;

    /// The queued or processing job for a file, if any.
    async fn get_active_job_for_file(&self, file_id: Uuid)
    -> MetadataResult<Option<ImportJobRow>>;

    /// Read the job and up to `error_limit` of its errors (in recording order)
    /// in one transaction.
    async fn get_job_snapshot(
        &self,
        job_id: Uuid,
        error_limit: u32,
    ) -> MetadataResult<Option<JobSnapshotRow>>;

    /// `queued -> processing`. Returns `false` if the job was not queued.
    async fn claim_job(&self, job_id: Uuid, started_at: OffsetDateTime) -> MetadataResult<bool>;

    /// Write counters and append new errors in one transaction.
    /// Returns `false` (and writes nothing) unless the job is processing.
    async fn flush_progress(
        &self,
        job_id: Uuid,
        update: &JobProgressUpdate,
    ) -> MetadataResult<bool>;

    /// Apply the final progress and move to a terminal state in one transaction.
    /// Returns `false` (and writes nothing) if the job is already terminal.
    async fn finish_job(&self, job_id: Uuid, completion: &JobCompletion) -> MetadataResult<bool>;

    /// Mark a non-terminal job failed, keeping whatever stats it has.
    /// Returns `false` if it was already terminal.
    async fn fail_job(
        &self,
        job_id: Uuid,
        message: &str,
        finished_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Jobs left queued or processing, e.g. by a previous server process.
    async fn get_orphaned_jobs(&self) -> MetadataResult<Vec<ImportJobRow>>;
}
