//! Job status polling.

use crate::api_client::ImportApi;
use crate::error::{PipelineError, TransportError};
use hopper_core::config::TransferPolicy;
use hopper_core::job::{JobId, JobSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Polls a job until it reaches a terminal state.
///
/// Exactly one status request is outstanding at a time. The next tick is
/// only awaited after the previous request resolved, so a slow server
/// stretches the cadence instead of piling up requests.
pub struct JobStatusPoller {
    api: Arc<dyn ImportApi>,
    interval: Duration,
    poll_timeout: Duration,
    max_consecutive_failures: u32,
}

impl JobStatusPoller {
    pub fn new(api: Arc<dyn ImportApi>, policy: &TransferPolicy) -> Self {
        Self {
            api,
            interval: policy.poll_interval(),
            poll_timeout: policy.poll_timeout(),
            max_consecutive_failures: policy.max_consecutive_poll_failures,
        }
    }

    /// Poll `job_id` until terminal, calling `on_snapshot` with every
    /// snapshot received.
    ///
    /// Retryable failures are skipped until more than
    /// `max_consecutive_failures` happen in a row. A rejected request (4xx)
    /// ends polling immediately.
    #[tracing::instrument(skip(self, cancel, on_snapshot), fields(job_id = %job_id))]
    pub async fn run(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        on_snapshot: &(dyn Fn(&JobSnapshot) + Send + Sync),
    ) -> Result<JobSnapshot, PipelineError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = tokio::time::timeout(self.poll_timeout, self.api.job_status(job_id)) => {
                    result.unwrap_or(Err(TransportError::Timeout(self.poll_timeout)))
                }
            };

            match result {
                Ok(snapshot) => {
                    failures = 0;
                    on_snapshot(&snapshot);
                    if snapshot.state.is_terminal() {
                        tracing::info!(state = %snapshot.state, "Job finished");
                        return Ok(snapshot);
                    }
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures > self.max_consecutive_failures {
                        tracing::error!(failures, error = %e, "Giving up on job status");
                        return Err(PipelineError::StatusUnavailable {
                            failures,
                            last_error: e.to_string(),
                        });
                    }
                    tracing::warn!(failures, error = %e, "Status poll failed, retrying on next tick");
                }
                Err(e) => return Err(PipelineError::Status(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hopper_core::job::{JobState, JobStats};
    use hopper_core::upload::FileId;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedApi {
        statuses: Mutex<VecDeque<Result<JobSnapshot, TransportError>>>,
        polls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<Result<JobSnapshot, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.into()),
                polls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ImportApi for ScriptedApi {
        async fn trigger_processing(&self, _file_id: FileId) -> Result<JobId, TransportError> {
            unreachable!("poller never triggers jobs")
        }

        async fn job_status(&self, _job_id: JobId) -> Result<JobSnapshot, TransportError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn snapshot(state: JobState, processed: u64) -> JobSnapshot {
        JobSnapshot {
            job_id: JobId::new(),
            file_id: None,
            state,
            stats: JobStats {
                total: 4,
                processed,
                ..JobStats::default()
            },
            message: String::new(),
            errors: Vec::new(),
        }
    }

    fn blip() -> Result<JobSnapshot, TransportError> {
        Err(TransportError::Network("connection refused".into()))
    }

    #[tokio::test]
    async fn test_tolerates_blips_until_terminal() {
        let api = ScriptedApi::new(vec![
            Ok(snapshot(JobState::Queued, 0)),
            blip(),
            Ok(snapshot(JobState::Processing, 2)),
            blip(),
            blip(),
            Ok(snapshot(JobState::Completed, 4)),
        ]);
        let poller = JobStatusPoller::new(api.clone(), &TransferPolicy::for_testing());
        let seen = Mutex::new(Vec::new());

        let last = poller
            .run(JobId::new(), &CancellationToken::new(), &|s: &JobSnapshot| {
                seen.lock().unwrap().push(s.stats.processed)
            })
            .await
            .unwrap();

        assert_eq!(last.state, JobState::Completed);
        assert_eq!(api.polls.load(Ordering::SeqCst), 6);
        assert_eq!(*seen.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_failures() {
        let policy = TransferPolicy::for_testing();
        let api = ScriptedApi::new(vec![Ok(snapshot(JobState::Processing, 1))]);
        let poller = JobStatusPoller::new(api.clone(), &policy);

        let err = poller
            .run(JobId::new(), &CancellationToken::new(), &|_: &JobSnapshot| {})
            .await
            .unwrap_err();

        match err {
            PipelineError::StatusUnavailable { failures, .. } => {
                assert_eq!(failures, policy.max_consecutive_poll_failures + 1)
            }
            other => panic!("expected StatusUnavailable, got {other:?}"),
        }
        assert_eq!(
            api.polls.load(Ordering::SeqCst),
            policy.max_consecutive_poll_failures + 2
        );
    }

    #[tokio::test]
    async fn test_rejected_poll_is_fatal() {
        let api = ScriptedApi::new(vec![Err(TransportError::Rejected {
            status: 404,
            message: "job not found".into(),
        })]);
        let poller = JobStatusPoller::new(api.clone(), &TransferPolicy::for_testing());

        let err = poller
            .run(JobId::new(), &CancellationToken::new(), &|_: &JobSnapshot| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Status(TransportError::Rejected { status: 404, .. })));
        assert_eq!(api.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let statuses = (0..1000)
            .map(|_| Ok(snapshot(JobState::Processing, 1)))
            .collect();
        let api = ScriptedApi::new(statuses);
        let poller = JobStatusPoller::new(api.clone(), &TransferPolicy::for_testing());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            trigger.cancel();
        });

        let err = poller.run(JobId::new(), &cancel, &|_: &JobSnapshot| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));

        let polls = api.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), polls);
    }
}
