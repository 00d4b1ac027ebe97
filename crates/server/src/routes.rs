//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and the small text fields around a payload.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Body limit for trigger requests, which carry one small JSON object.
const MAX_TRIGGER_BODY_SIZE: usize = 16 * 1024;

fn body_limit(payload_max: u64) -> DefaultBodyLimit {
    let limit = usize::try_from(payload_max)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(limit)
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let import = &state.config.import;

    let api_routes = Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/import/capabilities", get(handlers::get_capabilities))
        .route(
            "/api/import/upload",
            post(handlers::upload_file).layer(body_limit(import.max_file_size)),
        )
        .route(
            "/api/import/upload-chunk",
            post(handlers::upload_chunk).layer(body_limit(server.max_chunk_size)),
        )
        .route(
            "/api/import/process",
            post(handlers::trigger_processing)
                .layer(DefaultBodyLimit::max(MAX_TRIGGER_BODY_SIZE)),
        )
        .route(
            "/api/import/status/{job_id}",
            get(handlers::get_job_status),
        );

    let mut router = Router::new().merge(api_routes);

    // Must be network-restricted to the Prometheus scraper when enabled.
    if server.metrics_enabled {
        crate::metrics::register_metrics();
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
