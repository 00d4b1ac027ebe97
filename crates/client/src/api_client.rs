//! HTTP client for the import server.

use crate::error::TransportError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use hopper_core::job::{
    JobId, JobSnapshot, JobStatusResponse, TriggerProcessingRequest, TriggerProcessingResponse,
};
use hopper_core::upload::{
    ChunkUploadResponse, ErrorResponse, FileId, ImportCapabilities, SessionId, UploadResponse,
    fields,
};
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upload bodies are streamed in slices of this size; each slice handed to
/// the connection is one progress report.
const STREAM_SLICE_SIZE: usize = 64 * 1024;

/// Progress callback: bytes of the current request body sent so far.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Job operations the pipeline needs after a file is on the server.
#[async_trait]
pub trait ImportApi: Send + Sync {
    /// Start (or rejoin) the import job for an assembled file.
    async fn trigger_processing(&self, file_id: FileId) -> Result<JobId, TransportError>;

    /// Fetch one consistent snapshot of a job.
    async fn job_status(&self, job_id: JobId) -> Result<JobSnapshot, TransportError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid server URL")?;
        // Keep any path prefix when joining relative endpoint paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| TransportError::InvalidResponse(format!("{e}: {body}")));
        }

        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => err.message,
            Err(_) if body.trim().is_empty() => status.to_string(),
            Err(_) => body,
        };
        Err(match status.as_u16() {
            413 => TransportError::PayloadTooLarge(message),
            code if status.is_client_error() => TransportError::Rejected {
                status: code,
                message,
            },
            code => TransportError::Server {
                status: code,
                message,
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request.send().await.map_err(|e| self.classify(e))?;
        self.read_json(response).await
    }

    /// Send a multipart form whose file part streams `bytes`, reporting
    /// progress while the request is in flight.
    async fn send_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        file_field: &'static str,
        file_name: &str,
        bytes: Bytes,
        text_fields: Vec<(&'static str, String)>,
        on_progress: ProgressFn<'_>,
    ) -> Result<T, TransportError> {
        let url = self.url(path)?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let len = bytes.len() as u64;
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(progress_stream(bytes, tx)), len)
            .file_name(file_name.to_string());
        let form = text_fields
            .into_iter()
            .fold(Form::new().part(file_field, part), |form, (name, value)| {
                form.text(name, value)
            });

        let request = self.http.post(url).multipart(form).send();
        tokio::pin!(request);

        // Progress is reported from this task, so a dropped (cancelled)
        // request never produces another callback.
        let result = loop {
            tokio::select! {
                result = &mut request => break result,
                Some(sent) = rx.recv() => on_progress(sent),
            }
        };
        while let Ok(sent) = rx.try_recv() {
            on_progress(sent);
        }

        let response = result.map_err(|e| self.classify(e))?;
        self.read_json(response).await
    }

    /// GET /api/health
    pub async fn health(&self) -> Result<serde_json::Value, TransportError> {
        let url = self.url("api/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// GET /api/import/capabilities
    pub async fn capabilities(&self) -> Result<ImportCapabilities, TransportError> {
        let url = self.url("api/import/capabilities")?;
        self.send_json(self.http.get(url)).await
    }

    /// POST /api/import/upload
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> Result<FileId, TransportError> {
        let response: UploadResponse = self
            .send_multipart(
                "api/import/upload",
                fields::FILE,
                file_name,
                bytes,
                Vec::new(),
                on_progress,
            )
            .await?;
        Ok(response.file_id)
    }

    /// POST /api/import/upload-chunk
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_chunk(
        &self,
        session_id: &SessionId,
        ordinal: u32,
        total_chunks: u32,
        file_name: &str,
        file_size: u64,
        bytes: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> Result<ChunkUploadResponse, TransportError> {
        let text_fields = vec![
            (fields::CHUNK_INDEX, ordinal.to_string()),
            (fields::TOTAL_CHUNKS, total_chunks.to_string()),
            (fields::FILE_ID, session_id.to_string()),
            (fields::FILE_NAME, file_name.to_string()),
            (fields::FILE_SIZE, file_size.to_string()),
        ];
        self.send_multipart(
            "api/import/upload-chunk",
            fields::CHUNK,
            file_name,
            bytes,
            text_fields,
            on_progress,
        )
        .await
    }
}

#[async_trait]
impl ImportApi for ApiClient {
    async fn trigger_processing(&self, file_id: FileId) -> Result<JobId, TransportError> {
        let url = self.url("api/import/process")?;
        let response: TriggerProcessingResponse = self
            .send_json(
                self.http
                    .post(url)
                    .json(&TriggerProcessingRequest { file_id }),
            )
            .await?;
        Ok(response.job_id)
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobSnapshot, TransportError> {
        let url = self.url(&format!("api/import/status/{job_id}"))?;
        let response: JobStatusResponse = self.send_json(self.http.get(url)).await?;
        Ok(JobSnapshot::from_status(job_id, response))
    }
}

/// Body stream that reports the running byte count as each slice is taken.
fn progress_stream(
    bytes: Bytes,
    tx: mpsc::UnboundedSender<u64>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let slices: Vec<Bytes> = (0..bytes.len())
        .step_by(STREAM_SLICE_SIZE)
        .map(|start| bytes.slice(start..(start + STREAM_SLICE_SIZE).min(bytes.len())))
        .collect();

    let mut sent = 0u64;
    stream::iter(slices.into_iter().map(move |slice| {
        sent += slice.len() as u64;
        // The receiver is gone once the request finished or was dropped
        let _ = tx.send(sent);
        Ok(slice)
    }))
}
