//! In-memory stand-ins for the server.

use async_trait::async_trait;
use hopper_client::api_client::ProgressFn;
use hopper_client::{Ack, CancelHandle, ImportApi, TransferUnit, TransportError, UploadTransport};
use hopper_core::job::{JobId, JobSnapshot, JobState, JobStats};
use hopper_core::upload::FileId;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// What the fake transport saw for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUnit {
    pub ordinal: u32,
    pub chunked: bool,
    pub len: u64,
}

/// Accepts every unit unless scripted otherwise; the last ordinal
/// completes the file.
#[allow(dead_code)]
pub struct FakeTransport {
    pub file_id: FileId,
    script: Mutex<VecDeque<Result<Ack, TransportError>>>,
    sent: Mutex<Vec<SentUnit>>,
    cancel_at: Mutex<Option<(u32, CancelHandle)>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Result<Ack, TransportError>>) -> Self {
        Self {
            file_id: FileId::new(),
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
            cancel_at: Mutex::new(None),
        }
    }

    /// While `ordinal` is in flight, cancel through `handle` and never answer.
    pub fn cancel_while_sending(&self, ordinal: u32, handle: CancelHandle) {
        *self.cancel_at.lock().unwrap() = Some((ordinal, handle));
    }

    pub fn sent(&self) -> Vec<SentUnit> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_ordinals(&self) -> Vec<u32> {
        self.sent().into_iter().map(|unit| unit.ordinal).collect()
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn send(
        &self,
        unit: &TransferUnit,
        on_progress: ProgressFn<'_>,
    ) -> Result<Ack, TransportError> {
        let (ordinal, total, chunked) = match unit {
            TransferUnit::Whole { .. } => (0, 1, false),
            TransferUnit::Chunk {
                ordinal,
                total_chunks,
                ..
            } => (*ordinal, *total_chunks, true),
        };
        self.sent.lock().unwrap().push(SentUnit {
            ordinal,
            chunked,
            len: unit.len(),
        });
        on_progress(unit.len() / 2);

        let cancel = match &*self.cancel_at.lock().unwrap() {
            Some((at, handle)) if *at == ordinal => Some(handle.clone()),
            _ => None,
        };
        if let Some(handle) = cancel {
            handle.cancel();
            futures::future::pending::<()>().await;
        }

        on_progress(unit.len());
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        let is_complete = ordinal + 1 == total;
        Ok(Ack {
            is_complete,
            file_id: is_complete.then_some(self.file_id),
        })
    }
}

/// Job API that hands out one job and replays scripted statuses.
#[allow(dead_code)]
pub struct FakeImportApi {
    pub job_id: JobId,
    triggers: Mutex<VecDeque<Result<JobId, TransportError>>>,
    statuses: Mutex<VecDeque<Result<JobSnapshot, TransportError>>>,
    trigger_calls: AtomicU32,
    poll_calls: AtomicU32,
    triggered_with: Mutex<Vec<FileId>>,
}

#[allow(dead_code)]
impl FakeImportApi {
    /// A job that reports progress twice and then completes with `total` rows.
    pub fn completing(total: u64) -> Self {
        let job_id = JobId::new();
        let statuses = vec![
            Ok(job_snapshot(job_id, JobState::Queued, total, 0)),
            Ok(job_snapshot(job_id, JobState::Processing, total, total / 2)),
            Ok(job_snapshot(job_id, JobState::Completed, total, total)),
        ];
        Self::scripted(job_id, Vec::new(), statuses)
    }

    pub fn scripted(
        job_id: JobId,
        triggers: Vec<Result<JobId, TransportError>>,
        statuses: Vec<Result<JobSnapshot, TransportError>>,
    ) -> Self {
        Self {
            job_id,
            triggers: Mutex::new(triggers.into()),
            statuses: Mutex::new(statuses.into()),
            trigger_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            triggered_with: Mutex::new(Vec::new()),
        }
    }

    pub fn trigger_calls(&self) -> u32 {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn triggered_with(&self) -> Vec<FileId> {
        self.triggered_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImportApi for FakeImportApi {
    async fn trigger_processing(&self, file_id: FileId) -> Result<JobId, TransportError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        self.triggered_with.lock().unwrap().push(file_id);
        self.triggers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.job_id))
    }

    async fn job_status(&self, _job_id: JobId) -> Result<JobSnapshot, TransportError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("server went away".into())))
    }
}

#[allow(dead_code)]
pub fn job_snapshot(job_id: JobId, state: JobState, total: u64, processed: u64) -> JobSnapshot {
    JobSnapshot {
        job_id,
        file_id: None,
        state,
        stats: JobStats {
            total,
            processed,
            created: processed,
            ..JobStats::default()
        },
        message: String::new(),
        errors: Vec::new(),
    }
}
