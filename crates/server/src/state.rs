//! Application state shared across handlers.

use crate::assembler::ChunkAssembler;
use crate::processor::ImportJobProcessor;
use hopper_core::config::AppConfig;
use hopper_core::job::JobId;
use hopper_metadata::MetadataStore;
use hopper_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How often the watchdog looks for finished import tasks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Registry of running import tasks.
///
/// A task that panics, or returns after losing its metadata connection,
/// never writes its terminal state. That would leave the job `processing`
/// forever and block new jobs for the same file. The watchdog reaps finished
/// tasks and marks any job they left non-terminal `failed`; the counters
/// written by earlier progress flushes are kept.
pub struct JobTaskRegistry {
    tasks: Arc<Mutex<HashMap<JobId, JoinHandle<()>>>>,
    /// Jobs whose failure could not be written yet, with the reason.
    unresolved: Mutex<Vec<(JobId, String)>>,
    metadata: Arc<dyn MetadataStore>,
}

impl JobTaskRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            unresolved: Mutex::new(Vec::new()),
            metadata,
        }
    }

    /// Register a spawned import task.
    pub async fn register(&self, job_id: JobId, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(job_id, handle);
    }

    /// Number of tasks not yet reaped.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Number of reaped jobs still waiting for their failure to be written.
    pub async fn unresolved(&self) -> usize {
        self.unresolved.lock().await.len()
    }

    /// Spawn the watchdog loop. Keep the handle alive for the server's lifetime.
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                self.check_tasks().await;
            }
        })
    }

    /// Reap finished tasks and fail every job they left non-terminal.
    pub async fn check_tasks(&self) {
        let retries = std::mem::take(&mut *self.unresolved.lock().await);
        for (job_id, reason) in retries {
            self.fail_unfinished(job_id, &reason).await;
        }

        let finished: Vec<(JobId, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<JobId> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();
            done.into_iter()
                .filter_map(|job_id| tasks.remove(&job_id).map(|h| (job_id, h)))
                .collect()
        };

        for (job_id, handle) in finished {
            let reason = match handle.await {
                Ok(()) => {
                    tracing::debug!(job_id = %job_id, "Import task finished");
                    "import task exited without recording a final state"
                }
                Err(join_err) if join_err.is_panic() => {
                    crate::metrics::IMPORT_JOBS_PANICKED.inc();
                    tracing::error!(
                        job_id = %job_id,
                        panic = ?join_err,
                        "Import task panicked"
                    );
                    "import task terminated unexpectedly"
                }
                Err(join_err) => {
                    tracing::warn!(job_id = %job_id, error = ?join_err, "Import task was cancelled");
                    "import task was cancelled"
                }
            };
            // No-op for jobs the task already finished
            self.fail_unfinished(job_id, reason).await;
        }
    }

    async fn fail_unfinished(&self, job_id: JobId, reason: &str) {
        match self
            .metadata
            .fail_job(*job_id.as_uuid(), reason, time::OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => {
                crate::metrics::IMPORT_JOBS_FAILED.inc();
                tracing::error!(job_id = %job_id, reason, "Marked unfinished import job as failed");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to mark unfinished job as failed, retrying on next check"
                );
                self.unresolved
                    .lock()
                    .await
                    .push((job_id, reason.to_string()));
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    pub assembler: Arc<ChunkAssembler>,
    pub processor: Arc<ImportJobProcessor>,
}

impl AppState {
    /// Build state with the default row validator and record sink.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        job_registry: Arc<JobTaskRegistry>,
    ) -> Self {
        let processor = Arc::new(ImportJobProcessor::with_defaults(
            metadata.clone(),
            storage.clone(),
            config.import.clone(),
            job_registry,
        ));
        Self::with_processor(config, storage, metadata, processor)
    }

    /// Build state around an already configured processor.
    pub fn with_processor(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        processor: Arc<ImportJobProcessor>,
    ) -> Self {
        let assembler = Arc::new(ChunkAssembler::new(
            storage.clone(),
            metadata.clone(),
            config.import.max_file_size,
        ));
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            assembler,
            processor,
        }
    }
}
