//! Upload handlers: whole files and chunks.

use crate::assembler::ChunkSubmission;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{BYTES_RECEIVED, CHUNK_UPLOAD_DURATION, record_upload_error};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, State};
use bytes::Bytes;
use hopper_core::upload::{ChunkUploadResponse, SessionId, UploadResponse, fields};
use std::time::Instant;

/// File name used when the client sends none.
const DEFAULT_FILE_NAME: &str = "upload.csv";

/// POST /api/import/upload - Upload a whole file in one request.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let result = receive_whole_file(&state, &mut multipart).await;
    if let Err(e) = &result {
        record_upload_error(e.code());
    }
    let file_id = result?;
    Ok(Json(UploadResponse {
        success: true,
        file_id,
    }))
}

async fn receive_whole_file(
    state: &AppState,
    multipart: &mut Multipart,
) -> ApiResult<hopper_core::upload::FileId> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(fields::FILE) {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();

        // Streamed straight to storage; the writer enforces max_file_size
        let mut writer = state.assembler.begin_file().await?;
        loop {
            match field.chunk().await {
                Ok(Some(data)) => {
                    if let Err(e) = writer.write(data).await {
                        writer.abort().await;
                        return Err(e.into());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    writer.abort().await;
                    return Err(e.into());
                }
            }
        }

        BYTES_RECEIVED.inc_by(writer.size());
        let file = state.assembler.commit_file(writer, &file_name, None).await?;
        return Ok(file.file_id.into());
    }

    Err(ApiError::BadRequest(format!(
        "missing '{}' field",
        fields::FILE
    )))
}

/// Fields of a chunk upload, collected in whatever order they arrive.
#[derive(Default)]
struct ChunkForm {
    chunk: Option<Bytes>,
    chunk_index: Option<u32>,
    total_chunks: Option<u32>,
    session_id: Option<String>,
    file_name: Option<String>,
    file_size: Option<u64>,
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("'{name}' must be a non-negative integer")))
}

fn required<T>(name: &str, value: Option<T>) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing '{name}' field")))
}

impl ChunkForm {
    async fn read(multipart: &mut Multipart) -> ApiResult<Self> {
        let mut form = ChunkForm::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                fields::CHUNK => form.chunk = Some(field.bytes().await?),
                fields::CHUNK_INDEX => {
                    form.chunk_index = Some(parse_number(&name, &field.text().await?)?)
                }
                fields::TOTAL_CHUNKS => {
                    form.total_chunks = Some(parse_number(&name, &field.text().await?)?)
                }
                fields::FILE_SIZE => {
                    form.file_size = Some(parse_number(&name, &field.text().await?)?)
                }
                fields::FILE_ID => form.session_id = Some(field.text().await?),
                fields::FILE_NAME => form.file_name = Some(field.text().await?),
                _ => {}
            }
        }
        Ok(form)
    }

    fn into_submission(self) -> ApiResult<ChunkSubmission> {
        let session_id = SessionId::parse(required(fields::FILE_ID, self.session_id)?.trim())?;
        let file_name = self
            .file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        Ok(ChunkSubmission {
            session_id,
            ordinal: required(fields::CHUNK_INDEX, self.chunk_index)?,
            total_chunks: required(fields::TOTAL_CHUNKS, self.total_chunks)?,
            file_name,
            file_size: required(fields::FILE_SIZE, self.file_size)?,
            bytes: required(fields::CHUNK, self.chunk)?,
        })
    }
}

/// POST /api/import/upload-chunk - Upload one chunk of a session.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let start_time = Instant::now();
    let result = accept_chunk(&state, &mut multipart).await;
    CHUNK_UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            record_upload_error(e.code());
            tracing::warn!(error = %e, "Chunk rejected");
            Err(e)
        }
    }
}

async fn accept_chunk(
    state: &AppState,
    multipart: &mut Multipart,
) -> ApiResult<ChunkUploadResponse> {
    let submission = ChunkForm::read(multipart).await?.into_submission()?;

    let max_chunk = state.config.server.max_chunk_size;
    let chunk_len = submission.bytes.len() as u64;
    if chunk_len > max_chunk {
        return Err(ApiError::FileTooLarge {
            size: chunk_len,
            max: max_chunk,
        });
    }

    let ack = state.assembler.submit(submission).await?;
    Ok(ChunkUploadResponse {
        success: true,
        is_complete: ack.is_complete,
        file_id: ack.file_id,
    })
}
