//! Sending file data to the server.

use crate::api_client::{ApiClient, ProgressFn};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use hopper_core::upload::{FileId, SessionId};

/// One request's worth of file data.
#[derive(Debug, Clone)]
pub enum TransferUnit {
    /// The whole file in one request.
    Whole { file_name: String, bytes: Bytes },
    /// One ordinal slice of a chunked transfer.
    Chunk {
        session_id: SessionId,
        ordinal: u32,
        total_chunks: u32,
        file_name: String,
        file_size: u64,
        bytes: Bytes,
    },
}

impl TransferUnit {
    pub fn bytes(&self) -> &Bytes {
        match self {
            Self::Whole { bytes, .. } | Self::Chunk { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// Server acknowledgement of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// True once the server holds the complete file.
    pub is_complete: bool,
    pub file_id: Option<FileId>,
}

/// Sends units to the server.
///
/// `on_progress` receives the bytes of the current unit sent so far; it is
/// never called after `send` returns or its future is dropped. Server
/// rejections come back as typed errors so the caller can decide whether
/// to retry.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        unit: &TransferUnit,
        on_progress: ProgressFn<'_>,
    ) -> Result<Ack, TransportError>;
}

/// Transport over the server's HTTP upload endpoints.
#[derive(Clone)]
pub struct HttpTransport {
    client: ApiClient,
}

impl HttpTransport {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send(
        &self,
        unit: &TransferUnit,
        on_progress: ProgressFn<'_>,
    ) -> Result<Ack, TransportError> {
        match unit {
            TransferUnit::Whole { file_name, bytes } => {
                let file_id = self
                    .client
                    .upload_file(file_name, bytes.clone(), on_progress)
                    .await?;
                Ok(Ack {
                    is_complete: true,
                    file_id: Some(file_id),
                })
            }
            TransferUnit::Chunk {
                session_id,
                ordinal,
                total_chunks,
                file_name,
                file_size,
                bytes,
            } => {
                let response = self
                    .client
                    .upload_chunk(
                        session_id,
                        *ordinal,
                        *total_chunks,
                        file_name,
                        *file_size,
                        bytes.clone(),
                        on_progress,
                    )
                    .await?;
                Ok(Ack {
                    is_complete: response.is_complete,
                    file_id: response.file_id,
                })
            }
        }
    }
}
