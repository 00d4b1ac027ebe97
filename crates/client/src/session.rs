//! Client-side state of one transfer.

use crate::error::{PipelineError, TransportError};
use crate::transport::{Ack, TransferUnit, UploadTransport};
use bytes::Bytes;
use hopper_core::chunk::TransferPlan;
use hopper_core::config::TransferPolicy;
use hopper_core::progress::ProgressTracker;
use hopper_core::upload::{FileId, SessionId};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Sends a planned file one unit at a time.
///
/// Units go out strictly in sequence, so `bytes_acknowledged` is a plain
/// running total. Progress is capped at 99 until the server confirms
/// assembly of the last unit.
#[derive(Debug)]
pub struct UploadSession {
    session_id: SessionId,
    file_name: String,
    data: Bytes,
    plan: TransferPlan,
    bytes_acknowledged: u64,
    next_ordinal: u32,
    progress: Mutex<ProgressTracker>,
}

impl UploadSession {
    pub fn new(file_name: impl Into<String>, data: Bytes, plan: TransferPlan) -> Self {
        let progress = Mutex::new(ProgressTracker::new(plan.file_size()));
        Self {
            session_id: SessionId::new(),
            file_name: file_name.into(),
            data,
            plan,
            bytes_acknowledged: 0,
            next_ordinal: 0,
            progress,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn bytes_acknowledged(&self) -> u64 {
        self.bytes_acknowledged
    }

    /// Ordinal of the next unit to send.
    pub fn next_ordinal(&self) -> u32 {
        self.next_ordinal
    }

    pub fn total_chunks(&self) -> u32 {
        self.plan.total_chunks()
    }

    fn unit(&self, ordinal: u32) -> TransferUnit {
        match &self.plan {
            TransferPlan::SingleShot { .. } => TransferUnit::Whole {
                file_name: self.file_name.clone(),
                bytes: self.data.clone(),
            },
            TransferPlan::Chunked {
                file_size, chunks, ..
            } => {
                let range = chunks[ordinal as usize];
                TransferUnit::Chunk {
                    session_id: self.session_id.clone(),
                    ordinal,
                    total_chunks: chunks.len() as u32,
                    file_name: self.file_name.clone(),
                    file_size: *file_size,
                    bytes: self.data.slice(range.as_range()),
                }
            }
        }
    }

    fn report(&self, in_flight: u64, on_percent: &(dyn Fn(u8) + Send + Sync)) {
        let emitted = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(self.bytes_acknowledged, in_flight);
        if let Some(percent) = emitted {
            on_percent(percent);
        }
    }

    fn finish(&self, on_percent: &(dyn Fn(u8) + Send + Sync)) {
        let emitted = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish();
        if let Some(percent) = emitted {
            on_percent(percent);
        }
    }

    /// Send every unit and return the assembled file's id.
    ///
    /// No `FileId` is returned unless the final unit's ack confirms the
    /// complete file.
    #[tracing::instrument(
        skip_all,
        fields(session_id = %self.session_id, file_name = %self.file_name, total_chunks = self.total_chunks())
    )]
    pub async fn run(
        &mut self,
        transport: &dyn UploadTransport,
        policy: &TransferPolicy,
        cancel: &CancellationToken,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<FileId, PipelineError> {
        let total = self.total_chunks();
        self.report(0, on_percent);

        while self.next_ordinal < total {
            let ordinal = self.next_ordinal;
            let unit = self.unit(ordinal);
            let ack = self
                .send_with_retry(transport, policy, cancel, &unit, on_percent)
                .await?;

            self.bytes_acknowledged += unit.len();
            self.next_ordinal += 1;
            let is_last = self.next_ordinal == total;
            tracing::debug!(ordinal, is_complete = ack.is_complete, "Unit acknowledged");

            match ack {
                Ack {
                    is_complete: true,
                    file_id: Some(file_id),
                } if is_last => {
                    self.finish(on_percent);
                    tracing::info!(file_id = %file_id, "Transfer complete");
                    return Ok(file_id);
                }
                Ack {
                    is_complete: false,
                    ..
                } if !is_last => self.report(0, on_percent),
                _ if is_last => {
                    return Err(PipelineError::Assembly(
                        "server did not confirm the complete file after the last chunk".to_string(),
                    ));
                }
                _ => {
                    return Err(PipelineError::Assembly(format!(
                        "server reported completion after chunk {} of {total}",
                        ordinal + 1
                    )));
                }
            }
        }

        Err(PipelineError::Assembly(
            "transfer plan has no units".to_string(),
        ))
    }

    async fn send_with_retry(
        &self,
        transport: &dyn UploadTransport,
        policy: &TransferPolicy,
        cancel: &CancellationToken,
        unit: &TransferUnit,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Ack, PipelineError> {
        let ordinal = match unit {
            TransferUnit::Whole { .. } => 0,
            TransferUnit::Chunk { ordinal, .. } => *ordinal,
        };
        let report = |sent: u64| self.report(sent, on_percent);
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = transport.send(unit, &report) => result,
            };

            match result {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() && attempt < policy.max_chunk_retries => {
                    let delay = policy.retry_delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        ordinal,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Chunk transfer failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(ordinal, attempt, error = %e, "Chunk transfer failed");
                    return Err(terminal_transfer_error(e));
                }
            }
        }
    }
}

fn terminal_transfer_error(e: TransportError) -> PipelineError {
    match e {
        TransportError::PayloadTooLarge(message) => PipelineError::FileTooLarge(message),
        TransportError::Rejected {
            status: 422,
            message,
        } => PipelineError::Assembly(message),
        other => PipelineError::Transfer(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::ProgressFn;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays scripted results; once the script runs out every unit is
    /// accepted and the last ordinal completes the file.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Ack, TransportError>>>,
        sent: Mutex<Vec<u32>>,
        file_id: FileId,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Ack, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
                file_id: FileId::new(),
            }
        }

        fn sent(&self) -> Vec<u32> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn send(
            &self,
            unit: &TransferUnit,
            on_progress: ProgressFn<'_>,
        ) -> Result<Ack, TransportError> {
            let (ordinal, total) = match unit {
                TransferUnit::Whole { .. } => (0, 1),
                TransferUnit::Chunk {
                    ordinal,
                    total_chunks,
                    ..
                } => (*ordinal, *total_chunks),
            };
            self.sent.lock().unwrap().push(ordinal);
            on_progress(unit.len() / 2);
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

    fn pending() -> Result<Ack, TransportError> {
        Ok(Ack {
            is_complete: false,
            file_id: None,
        })
    }

    fn policy() -> TransferPolicy {
        TransferPolicy {
            single_shot_threshold: 100,
            chunk_size: 100,
            max_file_size: 10_000,
            ..TransferPolicy::for_testing()
        }
    }

    fn session(size: usize) -> UploadSession {
        let plan = policy().plan(size as u64).unwrap();
        UploadSession::new("roster.csv", Bytes::from(vec![b'x'; size]), plan)
    }

    fn collector() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |p| sink.lock().unwrap().push(p))
    }

    #[tokio::test]
    async fn test_three_chunks_complete_on_last_ack() {
        let transport = ScriptedTransport::new(Vec::new());
        let mut session = session(250);
        let (percents, on_percent) = collector();

        let file_id = session
            .run(&transport, &policy(), &CancellationToken::new(), &on_percent)
            .await
            .unwrap();

        assert_eq!(file_id, transport.file_id);
        assert_eq!(transport.sent(), vec![0, 1, 2]);
        assert_eq!(session.bytes_acknowledged(), 250);
        let percents = percents.lock().unwrap().clone();
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert!(percents[..percents.len() - 1].iter().all(|p| *p <= 99));
    }

    #[tokio::test]
    async fn test_retry_never_regresses_progress() {
        let transport = ScriptedTransport::new(vec![
            pending(),
            Err(TransportError::Network("connection reset".into())),
            Err(TransportError::Timeout(std::time::Duration::from_secs(1))),
        ]);
        let mut session = session(300);
        let (percents, on_percent) = collector();

        session
            .run(&transport, &policy(), &CancellationToken::new(), &on_percent)
            .await
            .unwrap();

        // Ordinal 1 was sent three times
        assert_eq!(transport.sent(), vec![0, 1, 1, 1, 2]);
        let percents = percents.lock().unwrap().clone();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_session() {
        let errors = (0..=policy().max_chunk_retries)
            .map(|_| {
                Err(TransportError::Server {
                    status: 503,
                    message: "unavailable".into(),
                })
            })
            .collect();
        let transport = ScriptedTransport::new(errors);
        let mut session = session(50);
        let (percents, on_percent) = collector();

        let err = session
            .run(&transport, &policy(), &CancellationToken::new(), &on_percent)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transfer(TransportError::Server { .. })));
        assert_eq!(transport.sent().len() as u32, policy().max_chunk_retries + 1);
        assert!(!percents.lock().unwrap().contains(&100));
    }

    #[tokio::test]
    async fn test_payload_too_large_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::PayloadTooLarge(
            "file exceeds limit".into(),
        ))]);
        let mut session = session(50);

        let err = session
            .run(&transport, &policy(), &CancellationToken::new(), &|_: u8| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::FileTooLarge(_)));
        assert_eq!(transport.sent(), vec![0]);
    }

    #[tokio::test]
    async fn test_unconfirmed_last_chunk_is_assembly_failure() {
        let transport = ScriptedTransport::new(vec![pending(), pending()]);
        let mut session = session(150);

        let err = session
            .run(&transport, &policy(), &CancellationToken::new(), &|_: u8| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Assembly(_)));
    }

    #[tokio::test]
    async fn test_assembly_rejection_maps_to_assembly_failure() {
        let transport = ScriptedTransport::new(vec![
            pending(),
            Err(TransportError::Rejected {
                status: 422,
                message: "assembled size mismatch".into(),
            }),
        ]);
        let mut session = session(150);

        let err = session
            .run(&transport, &policy(), &CancellationToken::new(), &|_: u8| {})
            .await
            .unwrap_err();

        match err {
            PipelineError::Assembly(message) => assert!(message.contains("size mismatch")),
            other => panic!("expected assembly failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Network(
            "unreachable".into(),
        ))]);
        let policy = TransferPolicy {
            retry_base_delay_ms: 60_000,
            ..policy()
        };
        let mut session = session(50);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = session
            .run(&transport, &policy, &cancel, &|_: u8| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(transport.sent(), vec![0]);
    }

    #[tokio::test]
    async fn test_empty_file_is_one_whole_unit() {
        let transport = ScriptedTransport::new(Vec::new());
        let mut session = session(0);

        session
            .run(&transport, &policy(), &CancellationToken::new(), &|_: u8| {})
            .await
            .unwrap();

        assert_eq!(session.total_chunks(), 1);
        assert_eq!(transport.sent(), vec![0]);
    }
}
