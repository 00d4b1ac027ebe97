//! End-to-end import orchestration.
//!
//! The controller drives one import at a time through
//! plan → transfer → trigger → poll and is the only piece a front end
//! needs to talk to. Progress and state changes are published as
//! [`PipelineEvent`]s; the final result is returned from `run`.

use crate::api_client::{ApiClient, ImportApi};
use crate::error::{PipelineError, TransportError};
use crate::poller::JobStatusPoller;
use crate::session::UploadSession;
use crate::transport::{HttpTransport, UploadTransport};
use bytes::Bytes;
use hopper_core::chunk::TransferPlan;
use hopper_core::config::{ClientConfig, TransferPolicy};
use hopper_core::job::{JobId, JobSnapshot, JobState, JobStats, UploadOutcome};
use hopper_core::upload::FileId;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Planning,
    Transferring,
    AwaitingAssembly,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Transferring => "transferring",
            Self::AwaitingAssembly => "awaiting_assembly",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    State(PipelineState),
    /// Transfer percentage, non-decreasing and 100 only once assembled.
    TransferProgress(u8),
    JobProgress {
        state: JobState,
        percent: u8,
        stats: JobStats,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Finished(UploadOutcome),
    Cancelled,
}

/// Cancels whatever run the controller is currently executing.
///
/// Each run gets a fresh token, so cancelling an idle controller has no
/// effect on the next run.
#[derive(Clone, Default)]
pub struct CancelHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_cancelled()
    }

    fn reset(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        token.clone()
    }
}

pub struct PipelineController {
    transport: Arc<dyn UploadTransport>,
    api: Arc<dyn ImportApi>,
    policy: TransferPolicy,
    state: PipelineState,
    events: mpsc::UnboundedSender<PipelineEvent>,
    cancel: CancelHandle,
    last_error: Option<PipelineError>,
    last_snapshot: Option<JobSnapshot>,
}

impl PipelineController {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        api: Arc<dyn ImportApi>,
        policy: TransferPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            transport,
            api,
            policy,
            state: PipelineState::Idle,
            events,
            cancel: CancelHandle::default(),
            last_error: None,
            last_snapshot: None,
        };
        (controller, rx)
    }

    /// Controller talking HTTP to the server named in `config`.
    pub fn connect(
        config: &ClientConfig,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        config.policy.validate().map_err(anyhow::Error::msg)?;
        let client = ApiClient::new(&config.server_url, config.policy.request_timeout())?;
        Ok(Self::new(
            Arc::new(HttpTransport::new(client.clone())),
            Arc::new(client),
            config.policy.clone(),
        ))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Typed cause of the last failed run.
    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    /// Import the file at `path`.
    pub async fn run(&mut self, path: &Path) -> PipelineResult {
        let token = self.begin();
        let result = self.import_path(path, &token).await;
        self.conclude(result)
    }

    /// Import an in-memory file named `file_name`.
    pub async fn run_bytes(&mut self, file_name: &str, data: Bytes) -> PipelineResult {
        let token = self.begin();
        let result = self.import_bytes(file_name, data, &token).await;
        self.conclude(result)
    }

    fn begin(&mut self) -> CancellationToken {
        self.last_error = None;
        self.last_snapshot = None;
        let token = self.cancel.reset();
        self.set_state(PipelineState::Planning);
        token
    }

    fn set_state(&mut self, state: PipelineState) {
        tracing::debug!(from = %self.state, to = %state, "Pipeline state change");
        self.state = state;
        // Nobody listening is fine
        let _ = self.events.send(PipelineEvent::State(state));
    }

    fn check_file_type(&self, path: &Path) -> Result<(), PipelineError> {
        if self.policy.is_allowed_file(path) {
            return Ok(());
        }
        Err(PipelineError::InvalidFile(format!(
            "{} is not one of the accepted types ({})",
            path.display(),
            self.policy.allowed_extensions.join(", ")
        )))
    }

    async fn import_path(
        &mut self,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<UploadOutcome, PipelineError> {
        self.check_file_type(path)?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::InvalidFile(format!("{} has no file name", path.display())))?
            .to_string();

        // Reject oversized files before reading them
        let size = tokio::fs::metadata(path).await?.len();
        self.policy.plan(size)?;

        let data = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PipelineError::Cancelled),
            data = tokio::fs::read(path) => Bytes::from(data?),
        };
        self.import_bytes(&file_name, data, token).await
    }

    async fn import_bytes(
        &mut self,
        file_name: &str,
        data: Bytes,
        token: &CancellationToken,
    ) -> Result<UploadOutcome, PipelineError> {
        self.check_file_type(Path::new(file_name))?;
        let plan = self.policy.plan(data.len() as u64)?;
        tracing::info!(
            file_name,
            file_size = plan.file_size(),
            total_chunks = plan.total_chunks(),
            chunked = plan.is_chunked(),
            "Planned transfer"
        );
        self.execute(file_name, data, plan, token).await
    }

    async fn execute(
        &mut self,
        file_name: &str,
        data: Bytes,
        plan: TransferPlan,
        token: &CancellationToken,
    ) -> Result<UploadOutcome, PipelineError> {
        self.set_state(PipelineState::Transferring);
        let events = self.events.clone();
        let mut session = UploadSession::new(file_name, data, plan);
        let file_id = session
            .run(self.transport.as_ref(), &self.policy, token, &|percent: u8| {
                let _ = events.send(PipelineEvent::TransferProgress(percent));
            })
            .await?;

        self.set_state(PipelineState::AwaitingAssembly);
        let job_id = self.start_job(file_id, token).await?;
        tracing::info!(file_id = %file_id, job_id = %job_id, "Processing started");

        self.set_state(PipelineState::Processing);
        let poller = JobStatusPoller::new(self.api.clone(), &self.policy);
        let latest = Mutex::new(None);
        let polled = poller
            .run(job_id, token, &|snapshot: &JobSnapshot| {
                let _ = events.send(PipelineEvent::JobProgress {
                    state: snapshot.state,
                    percent: snapshot.stats.percent(snapshot.state),
                    stats: snapshot.stats,
                });
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
            })
            .await;
        self.last_snapshot = latest.into_inner().unwrap_or_else(PoisonError::into_inner);

        Ok(UploadOutcome::from_snapshot(&polled?))
    }

    /// Trigger processing, retrying transient failures. Triggering is
    /// idempotent on the server, so a retry after a lost response rejoins
    /// the same job.
    async fn start_job(
        &self,
        file_id: FileId,
        token: &CancellationToken,
    ) -> Result<JobId, PipelineError> {
        let timeout = self.policy.request_timeout();
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                result = tokio::time::timeout(timeout, self.api.trigger_processing(file_id)) => {
                    result.unwrap_or(Err(TransportError::Timeout(timeout)))
                }
            };

            match result {
                Ok(job_id) => return Ok(job_id),
                Err(e) if e.is_retryable() && attempt < self.policy.max_chunk_retries => {
                    let delay = self.policy.retry_delay(attempt);
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Trigger failed, retrying");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(PipelineError::JobStart(e.to_string())),
            }
        }
    }

    fn conclude(&mut self, result: Result<UploadOutcome, PipelineError>) -> PipelineResult {
        match result {
            Ok(outcome) => {
                let state = if outcome.success {
                    PipelineState::Completed
                } else {
                    PipelineState::Failed
                };
                self.set_state(state);
                PipelineResult::Finished(outcome)
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!("Import cancelled");
                self.set_state(PipelineState::Cancelled);
                self.state = PipelineState::Idle;
                PipelineResult::Cancelled
            }
            Err(e) => {
                tracing::error!(error = %e, "Import failed");
                let mut outcome = UploadOutcome::failure(e.to_string());
                // Keep whatever the job got through before things went wrong
                if let Some(snapshot) = &self.last_snapshot {
                    outcome.stats = snapshot.stats;
                    outcome.errors = snapshot.errors.clone();
                }
                self.last_error = Some(e);
                self.set_state(PipelineState::Failed);
                PipelineResult::Finished(outcome)
            }
        }
    }
}
