//! Chunk assembly.
//!
//! Chunks of one upload session may arrive more than once and in any order.
//! Each ordinal is stored as its own part object and recorded as received;
//! the submission that supplies the last missing ordinal concatenates the
//! parts into the final file. All submissions for a session are serialized
//! behind a per-session lock, so the completing submission is unique.

use crate::metrics::{
    ASSEMBLY_FAILURES, BYTES_RECEIVED, CHUNKS_RECEIVED, CHUNKS_REDELIVERED, FILES_ASSEMBLED,
    UPLOAD_SESSIONS_EXPIRED, UPLOAD_SESSIONS_STARTED,
};
use bytes::Bytes;
use dashmap::DashMap;
use hopper_core::hash::ContentHasher;
use hopper_core::upload::{FileId, SessionId, UploadState, part_object_key, part_object_prefix};
use hopper_core::ContentHash;
use hopper_metadata::models::{FileRow, UploadSessionRow};
use hopper_metadata::{MetadataError, MetadataStore};
use hopper_storage::{ObjectStore, StorageError, StreamingUpload};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("file too large: {size} bytes (maximum {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// The submission contradicts what the session already recorded.
    #[error("inconsistent upload session: {0}")]
    Inconsistent(String),

    #[error("upload session failed: {0}")]
    SessionFailed(String),

    #[error("assembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// One chunk as submitted by a client.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub session_id: SessionId,
    pub ordinal: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub file_size: u64,
    pub bytes: Bytes,
}

/// Result of a chunk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyAck {
    pub is_complete: bool,
    pub file_id: Option<FileId>,
}

impl AssemblyAck {
    fn pending() -> Self {
        Self {
            is_complete: false,
            file_id: None,
        }
    }

    fn complete(file_id: FileId) -> Self {
        Self {
            is_complete: true,
            file_id: Some(file_id),
        }
    }
}

/// Streams one file into storage while hashing and enforcing the size limit.
pub struct FileWriter {
    file_id: FileId,
    upload: Box<dyn StreamingUpload>,
    hasher: ContentHasher,
    size: u64,
    max_size: u64,
}

impl FileWriter {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append data. Fails once the running size exceeds the limit.
    pub async fn write(&mut self, data: Bytes) -> Result<(), AssemblyError> {
        let size = self.size + data.len() as u64;
        if size > self.max_size {
            return Err(AssemblyError::FileTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.hasher.update(&data);
        self.upload.write(data).await?;
        self.size = size;
        Ok(())
    }

    /// Complete the object and describe it. Nothing is recorded yet.
    async fn finish_row(
        self,
        file_name: &str,
        session_id: Option<&SessionId>,
    ) -> Result<FileRow, AssemblyError> {
        let size = self.upload.finish().await?;
        Ok(FileRow {
            file_id: *self.file_id.as_uuid(),
            file_name: file_name.to_string(),
            size_bytes: size as i64,
            sha256: self.hasher.finalize().to_hex(),
            object_key: self.file_id.to_object_key(),
            session_id: session_id.map(|s| s.as_str().to_string()),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Discard everything written so far.
    pub async fn abort(self) {
        if let Err(e) = self.upload.abort().await {
            tracing::warn!(file_id = %self.file_id, error = %e, "Failed to abort file upload");
        }
    }
}

/// Server-side chunk assembler.
pub struct ChunkAssembler {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    max_file_size: u64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChunkAssembler {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        max_file_size: u64,
    ) -> Self {
        Self {
            storage,
            metadata,
            max_file_size,
            locks: DashMap::new(),
        }
    }

    fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_session_lock(&self, session_id: &SessionId) {
        // Only drop the entry when nobody else holds or waits on it
        self.locks
            .remove_if(session_id.as_str(), |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Start writing a new file.
    pub async fn begin_file(&self) -> Result<FileWriter, AssemblyError> {
        let file_id = FileId::new();
        let upload = self.storage.put_stream(&file_id.to_object_key()).await?;
        Ok(FileWriter {
            file_id,
            upload,
            hasher: ContentHash::hasher(),
            size: 0,
            max_size: self.max_file_size,
        })
    }

    /// Finish a written file and make it available for processing.
    pub async fn commit_file(
        &self,
        writer: FileWriter,
        file_name: &str,
        session_id: Option<&SessionId>,
    ) -> Result<FileRow, AssemblyError> {
        let row = writer.finish_row(file_name, session_id).await?;
        if let Err(e) = self.metadata.create_file(&row).await {
            self.delete_object_best_effort(&row.object_key).await;
            return Err(e.into());
        }
        file_available(&row);
        Ok(row)
    }

    /// Accept one chunk.
    ///
    /// Idempotent per ordinal. Exactly one submission per session reports
    /// completion for the first time: the one that supplied the last missing
    /// ordinal. Re-sending that same ordinal afterwards reports the same file.
    #[tracing::instrument(
        skip(self, chunk),
        fields(session_id = %chunk.session_id, ordinal = chunk.ordinal, total_chunks = chunk.total_chunks)
    )]
    pub async fn submit(&self, chunk: ChunkSubmission) -> Result<AssemblyAck, AssemblyError> {
        if chunk.total_chunks == 0 {
            return Err(AssemblyError::InvalidChunk(
                "totalChunks must be at least 1".to_string(),
            ));
        }
        if chunk.ordinal >= chunk.total_chunks {
            return Err(AssemblyError::InvalidChunk(format!(
                "chunkIndex {} out of range for totalChunks {}",
                chunk.ordinal, chunk.total_chunks
            )));
        }
        if chunk.file_size > self.max_file_size {
            return Err(AssemblyError::FileTooLarge {
                size: chunk.file_size,
                max: self.max_file_size,
            });
        }

        let lock = self.session_lock(&chunk.session_id);
        let guard = lock.lock().await;
        let result = self.submit_locked(&chunk).await;
        drop(guard);
        drop(lock);

        if matches!(result, Ok(AssemblyAck { is_complete: true, .. }) | Err(_)) {
            self.release_session_lock(&chunk.session_id);
        }
        result
    }

    async fn submit_locked(&self, chunk: &ChunkSubmission) -> Result<AssemblyAck, AssemblyError> {
        let session_id = chunk.session_id.as_str();
        let now = OffsetDateTime::now_utc();

        let session = match self.metadata.get_session(session_id).await? {
            Some(session) => session,
            None => {
                let row = UploadSessionRow::new(
                    session_id,
                    &chunk.file_name,
                    chunk.file_size,
                    chunk.total_chunks,
                    now,
                );
                let session = self.metadata.create_session_if_absent(&row).await?;
                UPLOAD_SESSIONS_STARTED.inc();
                tracing::info!(
                    file_name = %chunk.file_name,
                    file_size = chunk.file_size,
                    "Upload session started"
                );
                session
            }
        };

        if session.total_chunks != i64::from(chunk.total_chunks) {
            return Err(AssemblyError::Inconsistent(format!(
                "totalChunks {} does not match session value {}",
                chunk.total_chunks, session.total_chunks
            )));
        }
        if session.file_size != chunk.file_size as i64 {
            return Err(AssemblyError::Inconsistent(format!(
                "fileSize {} does not match session value {}",
                chunk.file_size, session.file_size
            )));
        }

        match session.upload_state() {
            UploadState::Assembled => {
                CHUNKS_REDELIVERED.inc();
                let completing = session.completing_ordinal == Some(i64::from(chunk.ordinal));
                return Ok(match session.file_id {
                    Some(file_id) if completing => AssemblyAck::complete(file_id.into()),
                    _ => AssemblyAck::pending(),
                });
            }
            UploadState::Failed => {
                return Err(AssemblyError::SessionFailed(
                    session
                        .error_detail
                        .unwrap_or_else(|| "session failed".to_string()),
                ));
            }
            UploadState::Open => {}
        }

        let part_key = part_object_key(&chunk.session_id, chunk.ordinal);
        self.storage.put(&part_key, chunk.bytes.clone()).await?;
        let inserted = self
            .metadata
            .record_part(session_id, chunk.ordinal, chunk.bytes.len() as u64, now)
            .await?;

        CHUNKS_RECEIVED.inc();
        BYTES_RECEIVED.inc_by(chunk.bytes.len() as u64);
        if inserted {
            tracing::debug!(size_bytes = chunk.bytes.len(), "Chunk stored");
        } else {
            CHUNKS_REDELIVERED.inc();
            tracing::debug!(size_bytes = chunk.bytes.len(), "Chunk redelivered, replaced");
        }

        let received = self.metadata.count_parts(session_id).await?;
        if received < u64::from(chunk.total_chunks) {
            return Ok(AssemblyAck::pending());
        }

        let file = match self.assemble(&session).await {
            Ok(file) => file,
            Err(e) => {
                ASSEMBLY_FAILURES.inc();
                tracing::error!(error = %e, "Assembly failed");
                self.metadata
                    .fail_session(session_id, &e.to_string(), OffsetDateTime::now_utc())
                    .await?;
                return Err(match e {
                    e @ (AssemblyError::SizeMismatch { .. } | AssemblyError::FileTooLarge { .. }) => e,
                    other => AssemblyError::SessionFailed(other.to_string()),
                });
            }
        };

        // File row and session transition commit together. On error the
        // session stays open with its parts, and a resent chunk assembles again.
        let completed = self
            .metadata
            .complete_session(
                session_id,
                &file,
                chunk.ordinal,
                OffsetDateTime::now_utc(),
            )
            .await;
        match completed {
            Ok(true) => {}
            Ok(false) => {
                // Unreachable while the session lock is held
                self.delete_object_best_effort(&file.object_key).await;
                return Err(AssemblyError::Inconsistent(
                    "session left the open state during assembly".to_string(),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record assembled file");
                self.delete_object_best_effort(&file.object_key).await;
                return Err(e.into());
            }
        }

        file_available(&file);
        if let Err(e) = self
            .storage
            .delete_prefix(&part_object_prefix(&chunk.session_id))
            .await
        {
            tracing::warn!(error = %e, "Failed to delete chunk parts after assembly");
        }
        let file_id = FileId::from(file.file_id);
        tracing::info!(file_id = %file_id, "Upload session assembled");
        Ok(AssemblyAck::complete(file_id))
    }

    /// Concatenate every part of `session` in ordinal order into a new
    /// object. The returned row is not recorded yet.
    async fn assemble(&self, session: &UploadSessionRow) -> Result<FileRow, AssemblyError> {
        let session_id = SessionId::parse(&session.session_id)
            .map_err(|e| AssemblyError::SessionFailed(e.to_string()))?;
        let expected = session.file_size.max(0) as u64;
        let total = u32::try_from(session.total_chunks)
            .map_err(|_| AssemblyError::Inconsistent("totalChunks out of range".to_string()))?;

        let mut writer = self.begin_file().await?;
        for ordinal in 0..total {
            let data = match self.storage.get(&part_object_key(&session_id, ordinal)).await {
                Ok(data) => data,
                Err(e) => {
                    writer.abort().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.write(data).await {
                writer.abort().await;
                return Err(e);
            }
        }

        if writer.size() != expected {
            let actual = writer.size();
            writer.abort().await;
            return Err(AssemblyError::SizeMismatch { expected, actual });
        }

        writer.finish_row(&session.file_name, Some(&session_id)).await
    }

    /// Remove open sessions idle since before `older_than`, with their parts.
    ///
    /// Returns how many sessions were removed.
    pub async fn expire_sessions(
        &self,
        older_than: OffsetDateTime,
        batch_size: u32,
    ) -> Result<usize, AssemblyError> {
        let mut removed = 0;
        loop {
            let expired = self
                .metadata
                .get_expired_sessions(older_than, batch_size)
                .await?;
            if expired.is_empty() {
                break;
            }
            let batch_len = expired.len();
            let mut progressed = false;

            for row in expired {
                let Ok(session_id) = SessionId::parse(&row.session_id) else {
                    // Not addressable as a storage prefix; drop the record only
                    self.metadata.delete_session(&row.session_id).await?;
                    progressed = true;
                    continue;
                };

                let lock = self.session_lock(&session_id);
                let guard = lock.lock().await;

                // A chunk may have arrived while waiting for the lock
                let still_expired = self
                    .metadata
                    .get_session(&row.session_id)
                    .await?
                    .is_some_and(|s| s.upload_state() == UploadState::Open && s.updated_at < older_than);
                if still_expired {
                    if let Err(e) = self
                        .storage
                        .delete_prefix(&part_object_prefix(&session_id))
                        .await
                    {
                        tracing::warn!(session_id = %session_id, error = %e, "Failed to delete parts of expired session");
                    }
                    self.metadata.delete_session(&row.session_id).await?;
                    UPLOAD_SESSIONS_EXPIRED.inc();
                    removed += 1;
                    progressed = true;
                    tracing::info!(session_id = %session_id, "Expired upload session removed");
                }

                drop(guard);
                drop(lock);
                self.release_session_lock(&session_id);
            }

            if batch_len < batch_size as usize || !progressed {
                break;
            }
        }
        Ok(removed)
    }

    async fn delete_object_best_effort(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete object");
        }
    }
}

fn file_available(row: &FileRow) {
    FILES_ASSEMBLED.inc();
    tracing::info!(
        file_id = %row.file_id,
        size_bytes = row.size_bytes,
        sha256 = %row.sha256,
        "File available for processing"
    );
}
