//! API error types.

use crate::assembler::AssemblyError;
use crate::processor::ProcessorError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hopper_core::upload::ErrorResponse;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("file too large: {size} bytes (maximum {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("storage error: {0}")]
    Storage(#[from] hopper_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] hopper_metadata::MetadataError),

    #[error("{0}")]
    Core(#[from] hopper_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::FileTooLarge { .. } | Self::PayloadTooLarge(_) => "file_too_large",
            Self::Internal(_) => "internal_error",
            Self::Assembly(e) => match e {
                AssemblyError::FileTooLarge { .. } => "file_too_large",
                AssemblyError::InvalidChunk(_) => "bad_request",
                AssemblyError::Inconsistent(_) => "conflict",
                AssemblyError::SessionFailed(_) | AssemblyError::SizeMismatch { .. } => {
                    "assembly_failed"
                }
                AssemblyError::Storage(_) => "storage_error",
                AssemblyError::Metadata(_) => "metadata_error",
            },
            Self::Processor(e) => match e {
                ProcessorError::FileNotFound(_) => "not_found",
                ProcessorError::Metadata(_) => "job_start_failed",
            },
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(e) => match e {
                hopper_core::Error::FileTooLarge { .. } => "file_too_large",
                _ => "bad_request",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::FileTooLarge { .. } | Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Assembly(e) => match e {
                AssemblyError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                AssemblyError::InvalidChunk(_) => StatusCode::BAD_REQUEST,
                AssemblyError::Inconsistent(_) => StatusCode::CONFLICT,
                AssemblyError::SessionFailed(_) | AssemblyError::SizeMismatch { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AssemblyError::Storage(_) | AssemblyError::Metadata(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Processor(e) => match e {
                ProcessorError::FileNotFound(_) => StatusCode::NOT_FOUND,
                ProcessorError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(e) => match e {
                hopper_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                hopper_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                hopper_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                hopper_core::Error::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        // Body limit overruns surface as multipart read errors
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(e.body_text())
        } else {
            ApiError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
        let body = ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
