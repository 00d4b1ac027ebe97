//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Seconds an open upload session may sit idle before the sweeper removes it.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// How often the expiry sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

fn default_upload_timeout_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            upload_timeout_secs: default_upload_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Get the upload timeout as a Duration.
    pub fn upload_timeout(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.upload_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than 0".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.sweep_interval_secs == 0 {
            return Err("server.sweep_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Import pipeline settings applied by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Largest file the server accepts, whole or assembled.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum number of row errors returned by a status poll.
    /// The error count in the statistics is never truncated.
    #[serde(default = "default_max_errors_surfaced")]
    pub max_errors_surfaced: usize,
    /// Column name that identifies the header row.
    #[serde(default = "default_header_marker")]
    pub header_marker: String,
    /// Column holding each record's unique identifier.
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    /// Columns that must be present and non-empty in every row.
    #[serde(default)]
    pub required_columns: Vec<String>,
    /// Rows processed between progress flushes.
    #[serde(default = "default_progress_flush_rows")]
    pub progress_flush_rows: u64,
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_max_errors_surfaced() -> usize {
    50
}

fn default_header_marker() -> String {
    "codigo".to_string()
}

fn default_identifier_column() -> String {
    "codigo".to_string()
}

fn default_progress_flush_rows() -> u64 {
    25
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_errors_surfaced: default_max_errors_surfaced(),
            header_marker: default_header_marker(),
            identifier_column: default_identifier_column(),
            required_columns: Vec::new(),
            progress_flush_rows: default_progress_flush_rows(),
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.header_marker.trim().is_empty() {
            return Err("import.header_marker cannot be empty".to_string());
        }
        if self.identifier_column.trim().is_empty() {
            return Err("import.identifier_column cannot be empty".to_string());
        }
        if self.progress_flush_rows == 0 {
            return Err("import.progress_flush_rows must be greater than 0".to_string());
        }
        if self.max_file_size == 0 {
            return Err("import.max_file_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Metadata database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    Sqlite { path: PathBuf },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Root server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Configuration rooted in `dir`, with small limits suited to tests.
    pub fn for_testing(dir: &Path) -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                max_chunk_size: 64 * 1024,
                ..ServerConfig::default()
            },
            import: ImportConfig {
                max_file_size: 1024 * 1024,
                progress_flush_rows: 2,
                ..ImportConfig::default()
            },
            storage: StorageConfig::Filesystem {
                path: dir.join("storage"),
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("metadata.db"),
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.import.validate()?;
        Ok(())
    }
}

/// Client-side transfer and polling policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// Files of at most this many bytes are sent in one request.
    #[serde(default = "default_single_shot_threshold")]
    pub single_shot_threshold: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Files larger than this are rejected before any transfer starts.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_errors_surfaced")]
    pub max_errors_surfaced: usize,
    /// Retries per chunk after the first attempt.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Timeout applied to each transfer request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout applied to each status poll.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Consecutive failed polls tolerated before the import is given up.
    #[serde(default = "default_max_consecutive_poll_failures")]
    pub max_consecutive_poll_failures: u32,
    /// Accepted file extensions, compared case-insensitively.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_single_shot_threshold() -> u64 {
    crate::DEFAULT_SINGLE_SHOT_THRESHOLD
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_chunk_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_max_consecutive_poll_failures() -> u32 {
    30
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["csv".to_string()]
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            single_shot_threshold: default_single_shot_threshold(),
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_errors_surfaced: default_max_errors_surfaced(),
            max_chunk_retries: default_max_chunk_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            max_consecutive_poll_failures: default_max_consecutive_poll_failures(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl TransferPolicy {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_timeout_secs)
    }

    /// Backoff before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.saturating_pow(attempt);
        std::time::Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Whether `path` has one of the allowed extensions.
    pub fn is_allowed_file(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("policy.chunk_size must be greater than 0".to_string());
        }
        if self.chunk_size > self.max_file_size {
            return Err(format!(
                "policy.chunk_size {} exceeds policy.max_file_size {}",
                self.chunk_size, self.max_file_size
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err("policy.poll_interval_ms cannot be 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("policy.allowed_extensions cannot be empty".to_string());
        }
        Ok(())
    }

    /// Policy with tiny sizes and delays, for tests.
    pub fn for_testing() -> Self {
        Self {
            single_shot_threshold: 16,
            chunk_size: 16,
            max_file_size: 1024,
            poll_interval_ms: 10,
            retry_base_delay_ms: 1,
            request_timeout_secs: 5,
            poll_timeout_secs: 1,
            max_consecutive_poll_failures: 3,
            ..Self::default()
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the import server.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub policy: TransferPolicy,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            policy: TransferPolicy::default(),
        }
    }
}
