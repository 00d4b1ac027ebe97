//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, UploadSessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for chunked upload sessions and their received ordinals.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Insert the session unless one with the same id exists.
    /// Returns the stored session either way.
    async fn create_session_if_absent(
        &self,
        session: &UploadSessionRow,
    ) -> MetadataResult<UploadSessionRow>;

    /// Get an upload session by ID.
    async fn get_session(&self, session_id: &str) -> MetadataResult<Option<UploadSessionRow>>;

    /// Record an ordinal as durably stored. Idempotent.
    /// Returns `true` if this call inserted it, `false` on re-delivery.
    async fn record_part(
        &self,
        session_id: &str,
        ordinal: u32,
        size_bytes: u64,
        received_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Number of distinct ordinals received for a session.
    async fn count_parts(&self, session_id: &str) -> MetadataResult<u64>;

    /// Record the assembled `file` and move the open session to 'assembled'
    /// in one transaction. Returns `false`, writing nothing, if the session
    /// was not open.
    async fn complete_session(
        &self,
        session_id: &str,
        file: &FileRow,
        completing_ordinal: u32,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Transition an open session to 'failed' with a reason.
    async fn fail_session(
        &self,
        session_id: &str,
        error_detail: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Open sessions with no activity since `older_than`.
    async fn get_expired_sessions(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Delete a session and its received-part records.
    async fn delete_session(&self, session_id: &str) -> MetadataResult<()>;

    /// Count sessions still accepting chunks.
    async fn count_open_sessions(&self) -> MetadataResult<u64>;
}
