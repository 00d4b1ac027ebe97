//! Background import jobs.
//!
//! Triggering an import creates a queued job and returns at once; the rows
//! are processed on a spawned task that claims the job, parses the file and
//! feeds each row through a [`RowValidator`] and a [`RecordSink`]. Counters
//! and row errors are flushed in batches, each flush one transaction, so a
//! status poll always reads a consistent snapshot.

pub mod parser;
pub mod sink;
pub mod validator;

pub use parser::{ParseError, ParsedDocument, Row, parse_document};
pub use sink::{RecordSink, SinkError, SqliteRecordSink};
pub use validator::{ColumnValidator, Record, RowValidator};

use crate::metrics::{
    IMPORT_JOB_DURATION, IMPORT_JOBS_ACTIVE, IMPORT_JOBS_COMPLETED, IMPORT_JOBS_FAILED,
    IMPORT_JOBS_STARTED, ROW_ERRORS, ROWS_PROCESSED,
};
use crate::state::JobTaskRegistry;
use hopper_core::config::ImportConfig;
use hopper_core::job::{JobId, JobSnapshot, JobState, JobStats};
use hopper_core::upload::FileId;
use hopper_metadata::models::{
    FileRow, ImportJobRow, JobCompletion, JobErrorRow, JobProgressUpdate, JobSnapshotRow,
};
use hopper_metadata::repos::UpsertKind;
use hopper_metadata::{MetadataError, MetadataResult, MetadataStore};
use hopper_storage::{ObjectStore, StorageError};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors starting a job.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("could not start import job: {0}")]
    Metadata(#[from] MetadataError),
}

/// Why a running job stopped before attempting every row.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error("could not open file: {0}")]
    Open(StorageError),

    #[error(transparent)]
    Parse(#[from] parser::ParseError),

    #[error("{0}")]
    SinkUnavailable(String),

    #[error("could not record progress: {0}")]
    Metadata(#[from] MetadataError),

    /// The job left the processing state underneath us.
    #[error("job is no longer processing")]
    Superseded,
}

/// Result of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedJob {
    pub job_id: JobId,
    /// False when an active job already existed for the file.
    pub created: bool,
}

/// Tracks the active-jobs gauge across normal exit and panics.
struct ActiveJobGuard;

impl ActiveJobGuard {
    fn new() -> Self {
        IMPORT_JOBS_ACTIVE.inc();
        Self
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        IMPORT_JOBS_ACTIVE.dec();
    }
}

/// In-memory progress of one job between flushes.
struct JobRun {
    job_id: JobId,
    stats: JobStats,
    pending_errors: Vec<JobErrorRow>,
}

impl JobRun {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            stats: JobStats::default(),
            pending_errors: Vec::new(),
        }
    }

    fn record_error(&mut self, row: &Row, identifier: &str, message: String) {
        tracing::warn!(
            job_id = %self.job_id,
            row = row.line,
            identifier = %identifier,
            error = %message,
            "Row rejected"
        );
        ROW_ERRORS.inc();
        self.stats.errors += 1;
        self.pending_errors.push(JobErrorRow {
            job_id: *self.job_id.as_uuid(),
            row_number: row.line as i64,
            identifier: identifier.to_string(),
            message,
        });
    }

    fn progress(&self) -> JobProgressUpdate {
        JobProgressUpdate {
            stats: self.stats,
            new_errors: self.pending_errors.clone(),
        }
    }

    fn summary(&self) -> String {
        format!(
            "Import completed: {} rows processed, {} created, {} updated, {} errors",
            self.stats.processed, self.stats.created, self.stats.updated, self.stats.errors
        )
    }
}

/// Server-side import job processor.
pub struct ImportJobProcessor {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    config: ImportConfig,
    validator: Arc<dyn RowValidator>,
    sink: Arc<dyn RecordSink>,
    registry: Arc<JobTaskRegistry>,
}

impl ImportJobProcessor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        config: ImportConfig,
        validator: Arc<dyn RowValidator>,
        sink: Arc<dyn RecordSink>,
        registry: Arc<JobTaskRegistry>,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
            validator,
            sink,
            registry,
        }
    }

    /// Processor using [`ColumnValidator`] and [`SqliteRecordSink`].
    pub fn with_defaults(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        config: ImportConfig,
        registry: Arc<JobTaskRegistry>,
    ) -> Self {
        let validator = Arc::new(ColumnValidator::from_config(&config));
        let sink = Arc::new(SqliteRecordSink::new(metadata.clone()));
        Self::new(metadata, storage, config, validator, sink, registry)
    }

    /// Enqueue a job for `file_id` and spawn its worker.
    ///
    /// If the file already has a queued or processing job, that job is
    /// returned instead and nothing is spawned.
    #[tracing::instrument(skip(self), fields(file_id = %file_id))]
    pub async fn start(self: &Arc<Self>, file_id: FileId) -> Result<StartedJob, ProcessorError> {
        let file = self
            .metadata
            .get_file(*file_id.as_uuid())
            .await?
            .ok_or(ProcessorError::FileNotFound(file_id))?;

        if let Some(active) = self.metadata.get_active_job_for_file(file.file_id).await? {
            tracing::info!(job_id = %active.job_id, "Import already active for file");
            return Ok(StartedJob {
                job_id: active.job_id.into(),
                created: false,
            });
        }

        let job_id = JobId::new();
        let row = ImportJobRow::queued(*job_id.as_uuid(), file.file_id, OffsetDateTime::now_utc());
        match self.metadata.create_job(&row).await {
            Ok(()) => {}
            Err(MetadataError::Constraint(msg)) => {
                // A concurrent trigger won the insert
                return match self.metadata.get_active_job_for_file(file.file_id).await? {
                    Some(active) => Ok(StartedJob {
                        job_id: active.job_id.into(),
                        created: false,
                    }),
                    None => Err(MetadataError::Constraint(msg).into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        IMPORT_JOBS_STARTED.inc();
        tracing::info!(job_id = %job_id, file_name = %file.file_name, "Import job queued");

        let processor = Arc::clone(self);
        let handle = tokio::spawn(async move { processor.run_job(job_id, file).await });
        self.registry.register(job_id, handle).await;

        Ok(StartedJob {
            job_id,
            created: true,
        })
    }

    /// Current snapshot of a job with at most `max_errors_surfaced` errors.
    pub async fn snapshot(&self, job_id: JobId) -> MetadataResult<Option<JobSnapshot>> {
        let limit = u32::try_from(self.config.max_errors_surfaced).unwrap_or(u32::MAX);
        let row = self
            .metadata
            .get_job_snapshot(*job_id.as_uuid(), limit)
            .await?;
        Ok(row.map(snapshot_from_row))
    }

    #[tracing::instrument(skip(self, file), fields(job_id = %job_id, file_id = %file.file_id))]
    async fn run_job(self: Arc<Self>, job_id: JobId, file: FileRow) {
        let uuid = *job_id.as_uuid();
        match self
            .metadata
            .claim_job(uuid, OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Job no longer queued, not processing");
                return;
            }
            Err(e) => {
                // The watchdog fails the job once this task is reaped
                tracing::error!(error = %e, "Failed to claim import job");
                return;
            }
        }

        let _active = ActiveJobGuard::new();
        let started = Instant::now();
        let mut run = JobRun::new(job_id);

        let (state, message) = match self.process(&mut run, &file).await {
            Ok(()) => (JobState::Completed, run.summary()),
            Err(JobFailure::Superseded) => {
                tracing::warn!("Import job was finalized elsewhere, stopping");
                return;
            }
            Err(e) => {
                let message = if run.stats.total > 0 {
                    format!(
                        "Import failed after {} of {} rows: {e}",
                        run.stats.processed, run.stats.total
                    )
                } else {
                    format!("Import failed: {e}")
                };
                (JobState::Failed, message)
            }
        };

        let completion = JobCompletion {
            state,
            message,
            progress: run.progress(),
            finished_at: OffsetDateTime::now_utc(),
        };
        match self.metadata.finish_job(uuid, &completion).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Import job already terminal, final state not written");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to write final job state");
                self.fail_after_lost_completion(uuid, &e).await;
                return;
            }
        }

        IMPORT_JOB_DURATION.observe(started.elapsed().as_secs_f64());
        match state {
            JobState::Completed => {
                IMPORT_JOBS_COMPLETED.inc();
                tracing::info!(
                    total = run.stats.total,
                    created = run.stats.created,
                    updated = run.stats.updated,
                    errors = run.stats.errors,
                    "Import job completed"
                );
            }
            _ => {
                IMPORT_JOBS_FAILED.inc();
                tracing::error!(
                    processed = run.stats.processed,
                    total = run.stats.total,
                    message = %completion.message,
                    "Import job failed"
                );
            }
        }
    }

    /// The counters could not be written; at least leave the job terminal.
    /// If this fails too, the watchdog retries once the task is reaped.
    async fn fail_after_lost_completion(&self, job_id: Uuid, cause: &MetadataError) {
        let message = format!("Import failed: could not record final state: {cause}");
        match self
            .metadata
            .fail_job(job_id, &message, OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => {
                IMPORT_JOBS_FAILED.inc();
                tracing::error!(message = %message, "Import job failed");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark import job as failed");
            }
        }
    }

    async fn process(&self, run: &mut JobRun, file: &FileRow) -> Result<(), JobFailure> {
        let data = self
            .storage
            .get(&file.object_key)
            .await
            .map_err(JobFailure::Open)?;
        let document = parse_document(&data, &self.config.header_marker)?;

        run.stats.total = document.rows.len() as u64;
        self.flush(run).await?;
        tracing::info!(
            total = run.stats.total,
            header_line = document.header_line,
            "Document parsed"
        );

        let flush_every = self.config.progress_flush_rows.max(1);
        for row in &document.rows {
            match self.validator.validate(row) {
                Err(message) => {
                    let identifier = row.get(&self.config.identifier_column).unwrap_or("");
                    run.record_error(row, identifier, message);
                }
                Ok(record) => match self.sink.upsert(&record, run.job_id).await {
                    Ok(UpsertKind::Created) => run.stats.created += 1,
                    Ok(UpsertKind::Updated) => run.stats.updated += 1,
                    Err(SinkError::Rejected(message)) => {
                        run.record_error(row, &record.identifier, message);
                    }
                    Err(SinkError::Unavailable(message)) => {
                        return Err(JobFailure::SinkUnavailable(message));
                    }
                },
            }

            run.stats.processed += 1;
            ROWS_PROCESSED.inc();
            if run.stats.processed % flush_every == 0 {
                self.flush(run).await?;
            }
        }

        Ok(())
    }

    async fn flush(&self, run: &mut JobRun) -> Result<(), JobFailure> {
        let applied = self
            .metadata
            .flush_progress(*run.job_id.as_uuid(), &run.progress())
            .await?;
        if !applied {
            return Err(JobFailure::Superseded);
        }
        run.pending_errors.clear();
        Ok(())
    }
}

/// Build a client-facing snapshot from stored rows.
pub fn snapshot_from_row(row: JobSnapshotRow) -> JobSnapshot {
    JobSnapshot {
        job_id: row.job.job_id.into(),
        file_id: Some(row.job.file_id.into()),
        state: row.job.job_state(),
        stats: row.job.stats(),
        message: row.job.message.clone(),
        errors: row.errors.iter().map(JobErrorRow::to_row_error).collect(),
    }
}

/// Fail jobs left queued or processing by a previous server process.
///
/// Their tasks died with that process, so nothing will ever finish them, and
/// an active job blocks new imports of the same file.
pub async fn recover_orphaned_jobs(metadata: &Arc<dyn MetadataStore>) -> MetadataResult<usize> {
    let orphaned = metadata.get_orphaned_jobs().await?;
    if orphaned.is_empty() {
        return Ok(0);
    }

    tracing::warn!(
        count = orphaned.len(),
        "Found import jobs from a previous server instance, marking as failed"
    );

    let mut recovered = 0;
    for job in orphaned {
        let failed = metadata
            .fail_job(
                job.job_id,
                "Import interrupted by a server restart",
                OffsetDateTime::now_utc(),
            )
            .await?;
        if failed {
            recovered += 1;
            tracing::warn!(
                job_id = %job.job_id,
                job_state = %job.state,
                processed = job.processed,
                total = job.total,
                "Marked orphaned import job as failed"
            );
        }
    }
    Ok(recovered)
}
