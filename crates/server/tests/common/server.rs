//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hopper_core::config::AppConfig;
use hopper_core::job::JobState;
use hopper_metadata::{MetadataStore, SqliteStore};
use hopper_server::processor::{ColumnValidator, ImportJobProcessor, RecordSink};
use hopper_server::state::JobTaskRegistry;
use hopper_server::{AppState, create_router};
use hopper_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub registry: Arc<JobTaskRegistry>,
    sqlite: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and small limits.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server whose processor writes to `sink`.
    pub async fn with_sink(sink: Arc<dyn RecordSink>) -> Self {
        Self::build(|_| {}, Some(sink)).await
    }

    async fn build<F>(modifier: F, sink: Option<Arc<dyn RecordSink>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        config.import.required_columns = vec!["nombre".to_string()];
        modifier(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("storage"))
                .await
                .expect("Failed to create storage backend"),
        );
        let sqlite = Arc::new(
            SqliteStore::new(temp_dir.path().join("metadata.db"))
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();
        let registry = Arc::new(JobTaskRegistry::new(metadata.clone()));

        let state = match sink {
            None => AppState::new(config, storage, metadata, registry.clone()),
            Some(sink) => {
                let processor = Arc::new(ImportJobProcessor::new(
                    metadata.clone(),
                    storage.clone(),
                    config.import.clone(),
                    Arc::new(ColumnValidator::from_config(&config.import)),
                    sink,
                    registry.clone(),
                ));
                AppState::with_processor(config, storage, metadata, processor)
            }
        };

        let router = create_router(state.clone());

        Self {
            router,
            state,
            registry,
            sqlite,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// The SQLite pool behind the metadata store, for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }

    /// Run one statement against the metadata database.
    pub async fn execute_sql(&self, sql: &str) {
        sqlx::query(sql).execute(self.pool()).await.unwrap();
    }

    /// Count rows matching a raw `SELECT COUNT(*)` query.
    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(self.pool()).await.unwrap()
    }

    /// Send a request and decode the JSON body (Null when empty or not JSON).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_multipart(&self, uri: &str, form: MultipartForm) -> (StatusCode, Value) {
        let (content_type, body) = form.finish();
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", content_type)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Upload a whole file and return its fileId.
    pub async fn upload_file(&self, name: &str, data: &[u8]) -> String {
        let form = MultipartForm::new().file("file", name, data);
        let (status, body) = self.post_multipart("/api/import/upload", form).await;
        assert_eq!(status, StatusCode::OK, "upload failed: {body}");
        body["fileId"].as_str().unwrap().to_string()
    }

    /// Send one chunk of a session.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        ordinal: u32,
        total_chunks: u32,
        file_name: &str,
        file_size: u64,
        chunk: &[u8],
    ) -> (StatusCode, Value) {
        let form = MultipartForm::new()
            .file("chunk", file_name, chunk)
            .text("chunkIndex", &ordinal.to_string())
            .text("totalChunks", &total_chunks.to_string())
            .text("fileId", session_id)
            .text("fileName", file_name)
            .text("fileSize", &file_size.to_string());
        self.post_multipart("/api/import/upload-chunk", form).await
    }

    /// Trigger processing and return (status, jobId).
    pub async fn trigger(&self, file_id: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/import/process",
            serde_json::json!({ "fileId": file_id }),
        )
        .await
    }

    /// Poll the status endpoint until the job is terminal.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, body) = self.get(&format!("/api/import/status/{job_id}")).await;
            assert_eq!(status, StatusCode::OK, "status poll failed: {body}");
            let state: JobState = serde_json::from_value(body["estado"].clone()).unwrap();
            if state.is_terminal() {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} did not finish: {body}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Hand-built multipart/form-data body.
#[allow(dead_code)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("hopper-test-{}", uuid::Uuid::new_v4().simple()),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Content-Type header value and the encoded body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}
