//! Capability discovery endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use hopper_core::upload::ImportCapabilities;

/// GET /api/import/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<ImportCapabilities>> {
    Ok(Json(ImportCapabilities {
        max_file_size: state.config.import.max_file_size,
        max_chunk_size: state.config.server.max_chunk_size,
        max_errors_surfaced: state.config.import.max_errors_surfaced,
        header_marker: state.config.import.header_marker.clone(),
    }))
}
