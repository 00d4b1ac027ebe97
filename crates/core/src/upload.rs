//! Upload session identifiers, lifecycle and wire types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a client-generated session token.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque client-generated token correlating the chunks of one transfer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session token.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a token received over the wire.
    ///
    /// Accepts 1 to 128 characters drawn from `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_SESSION_ID_LEN {
            return Err(crate::Error::InvalidId(format!(
                "session id must be 1-{MAX_SESSION_ID_LEN} characters, got {}",
                s.len()
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(crate::Error::InvalidId(format!(
                "invalid character in session id: {c:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for SessionId {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned handle of an assembled file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid file ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Object store key of the assembled file.
    pub fn to_object_key(&self) -> String {
        format!("files/{}", self.0)
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object store key of one received chunk part.
pub fn part_object_key(session_id: &SessionId, ordinal: u32) -> String {
    format!("parts/{session_id}/{ordinal:08}")
}

/// Object store prefix holding every part of a session.
pub fn part_object_prefix(session_id: &SessionId) -> String {
    format!("parts/{session_id}/")
}

/// Server-side upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Session is open and accepting chunks.
    Open,
    /// Every ordinal arrived and the file was assembled.
    Assembled,
    /// Assembly failed; further chunks are rejected.
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assembled => "assembled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "assembled" => Ok(Self::Assembled),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::UnknownState(other.to_string())),
        }
    }

    /// Check if the session is still active (can receive chunks).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Multipart field names of the chunk upload endpoint.
pub mod fields {
    pub const FILE: &str = "file";
    pub const CHUNK: &str = "chunk";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const FILE_ID: &str = "fileId";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_SIZE: &str = "fileSize";
}

/// Response from the whole-file upload endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_id: FileId,
}

/// Response from the chunk upload endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

/// Error body returned by every endpoint on failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// Limits advertised by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCapabilities {
    pub max_file_size: u64,
    pub max_chunk_size: u64,
    pub max_errors_surfaced: usize,
    pub header_marker: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(id.as_str()).unwrap(), id);
        assert!(SessionId::parse("abc_DEF-123").is_ok());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse("a b").is_err());
        assert!(SessionId::parse(&"x".repeat(129)).is_err());
        assert!(SessionId::parse(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn test_session_id_serde_validates() {
        let ok: SessionId = serde_json::from_str("\"s-1\"").unwrap();
        assert_eq!(ok.as_str(), "s-1");
        assert!(serde_json::from_str::<SessionId>("\"bad/id\"").is_err());
    }

    #[test]
    fn test_file_id_roundtrip() {
        let id = FileId::new();
        let parsed = FileId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(FileId::parse("not-a-uuid").is_err());
        assert!(id.to_object_key().starts_with("files/"));
    }

    #[test]
    fn test_part_keys_sort_by_ordinal() {
        let session = SessionId::parse("s1").unwrap();
        assert_eq!(part_object_key(&session, 2), "parts/s1/00000002");
        assert!(part_object_key(&session, 9) < part_object_key(&session, 10));
        assert!(part_object_key(&session, 0).starts_with(&part_object_prefix(&session)));
    }

    #[test]
    fn test_upload_state_roundtrip() {
        for state in [UploadState::Open, UploadState::Assembled, UploadState::Failed] {
            assert_eq!(UploadState::parse(state.as_str()).unwrap(), state);
        }
        assert!(UploadState::Open.is_active());
        assert!(!UploadState::Assembled.is_active());
    }

    #[test]
    fn test_chunk_response_camel_case() {
        let resp = ChunkUploadResponse {
            success: true,
            is_complete: false,
            file_id: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["isComplete"], false);
        assert!(json.get("fileId").is_none());
    }
}
