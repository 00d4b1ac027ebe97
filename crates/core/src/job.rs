//! Import job model and status wire types.

use crate::upload::FileId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an import job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid job ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Import job state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Created, waiting for a worker to claim it.
    Queued,
    /// A worker is parsing and upserting rows.
    Processing,
    /// Every row was attempted.
    Completed,
    /// Processing stopped before every row was attempted.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::UnknownState(other.to_string())),
        }
    }

    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counters of an import job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    #[serde(rename = "procesados")]
    pub processed: u64,
    #[serde(rename = "creados")]
    pub created: u64,
    #[serde(rename = "actualizados")]
    pub updated: u64,
    #[serde(rename = "errores")]
    pub errors: u64,
}

impl JobStats {
    /// Percentage of rows processed, for progress display.
    ///
    /// A job with no rows reports 100 once completed and 0 before.
    pub fn percent(&self, state: JobState) -> u8 {
        if self.total == 0 {
            return if state == JobState::Completed { 100 } else { 0 };
        }
        let pct = self.processed.min(self.total) * 100 / self.total;
        pct as u8
    }
}

/// One row that failed validation or could not be stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based line number in the source document.
    #[serde(rename = "fila")]
    pub row: u64,
    #[serde(rename = "identificador")]
    pub identifier: String,
    #[serde(rename = "mensaje")]
    pub message: String,
}

/// A consistent view of a job at one instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub file_id: Option<FileId>,
    pub state: JobState,
    pub stats: JobStats,
    pub message: String,
    /// Surfaced row errors, possibly truncated; `stats.errors` holds the full count.
    pub errors: Vec<RowError>,
}

impl JobSnapshot {
    pub fn from_status(job_id: JobId, status: JobStatusResponse) -> Self {
        Self {
            job_id,
            file_id: status.file_id,
            state: status.state,
            stats: status.stats,
            message: status.message,
            errors: status.errors.unwrap_or_default(),
        }
    }
}

/// Final client-visible result of an import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    pub stats: JobStats,
    pub errors: Vec<RowError>,
}

impl UploadOutcome {
    /// Outcome of a job that reached a terminal state.
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        Self {
            success: snapshot.state == JobState::Completed,
            message: snapshot.message.clone(),
            stats: snapshot.stats,
            errors: snapshot.errors.clone(),
        }
    }

    /// Outcome of a pipeline that failed before or outside the job.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            stats: JobStats::default(),
            errors: Vec::new(),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Request to start processing an assembled file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerProcessingRequest {
    pub file_id: FileId,
}

/// Response from triggering processing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerProcessingResponse {
    pub success: bool,
    pub job_id: JobId,
}

/// Response from the job status endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub success: bool,
    #[serde(rename = "estado")]
    pub state: JobState,
    #[serde(rename = "estadisticas")]
    pub stats: JobStats,
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "errores", default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<RowError>>,
    #[serde(rename = "fileId", default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

impl JobStatusResponse {
    /// Build a response, surfacing at most `max_errors` row errors.
    pub fn from_snapshot(snapshot: JobSnapshot, max_errors: usize) -> Self {
        let mut errors = snapshot.errors;
        errors.truncate(max_errors);
        Self {
            success: true,
            state: snapshot.state,
            stats: snapshot.stats,
            message: snapshot.message,
            errors: if errors.is_empty() { None } else { Some(errors) },
            file_id: snapshot.file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_error(row: u64) -> RowError {
        RowError {
            row,
            identifier: format!("W-{row}"),
            message: "missing name".to_string(),
        }
    }

    #[test]
    fn test_job_state_flags() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        for state in [
            JobState::Queued,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()).unwrap(), state);
        }
        assert!(JobState::parse("running").is_err());
    }

    #[test]
    fn test_job_percent() {
        let stats = JobStats {
            total: 3,
            processed: 1,
            ..JobStats::default()
        };
        assert_eq!(stats.percent(JobState::Processing), 33);

        let empty = JobStats::default();
        assert_eq!(empty.percent(JobState::Processing), 0);
        assert_eq!(empty.percent(JobState::Completed), 100);
    }

    #[test]
    fn test_status_wire_format() {
        let snapshot = JobSnapshot {
            job_id: JobId::new(),
            file_id: Some(FileId::new()),
            state: JobState::Completed,
            stats: JobStats {
                total: 3,
                processed: 3,
                created: 1,
                updated: 1,
                errors: 1,
            },
            message: "done".to_string(),
            errors: vec![row_error(4)],
        };
        let json = serde_json::to_value(JobStatusResponse::from_snapshot(snapshot, 50)).unwrap();
        assert_eq!(json["estado"], "completed");
        assert_eq!(json["estadisticas"]["procesados"], 3);
        assert_eq!(json["estadisticas"]["actualizados"], 1);
        assert_eq!(json["mensaje"], "done");
        assert_eq!(json["errores"][0]["fila"], 4);
        assert_eq!(json["errores"][0]["identificador"], "W-4");
    }

    #[test]
    fn test_errors_truncated_but_count_kept() {
        let snapshot = JobSnapshot {
            job_id: JobId::new(),
            file_id: Some(FileId::new()),
            state: JobState::Completed,
            stats: JobStats {
                total: 10,
                processed: 10,
                errors: 10,
                ..JobStats::default()
            },
            message: String::new(),
            errors: (1..=10).map(row_error).collect(),
        };
        let resp = JobStatusResponse::from_snapshot(snapshot, 3);
        let errors = resp.errors.unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].row, 1);
        assert_eq!(resp.stats.errors, 10);
    }

    #[test]
    fn test_outcome_from_failed_snapshot_keeps_stats() {
        let snapshot = JobSnapshot {
            job_id: JobId::new(),
            file_id: Some(FileId::new()),
            state: JobState::Failed,
            stats: JobStats {
                total: 10,
                processed: 4,
                created: 4,
                ..JobStats::default()
            },
            message: "record store unavailable".to_string(),
            errors: Vec::new(),
        };
        let outcome = UploadOutcome::from_snapshot(&snapshot);
        assert!(!outcome.success);
        assert_eq!(outcome.stats.created, 4);
        assert_eq!(outcome.stats.processed, 4);
    }
}
