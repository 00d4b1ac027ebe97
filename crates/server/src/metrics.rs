//! Prometheus metrics for the hopper server.
//!
//! Exposes counters for upload sessions, chunk receipt and assembly, and for
//! import jobs and the rows they process.
//!
//! The `/metrics` endpoint is unauthenticated. Metrics carry no file names,
//! identifiers or row content, only aggregate counts, but the endpoint should
//! still be restricted to the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload session metrics
pub static UPLOAD_SESSIONS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_started_total",
        "Total number of chunked upload sessions started",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_expired_total",
        "Total number of open upload sessions removed by the sweeper",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_chunks_received_total",
        "Total number of chunks received",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_REDELIVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_chunks_redelivered_total",
        "Total number of chunks received for an ordinal already stored",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_bytes_received_total",
        "Total upload bytes received (whole files and chunks)",
    )
    .expect("metric creation failed")
});

pub static FILES_ASSEMBLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_files_assembled_total",
        "Total number of files made available for processing",
    )
    .expect("metric creation failed")
});

pub static ASSEMBLY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_assembly_failures_total",
        "Total number of upload sessions that failed assembly",
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hopper_chunk_upload_duration_seconds",
            "Time taken to accept a single chunk, including assembly when it completes the set",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hopper_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Import job metrics
pub static IMPORT_JOBS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_import_jobs_started_total",
        "Total number of import jobs created",
    )
    .expect("metric creation failed")
});

pub static IMPORT_JOBS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_import_jobs_completed_total",
        "Total number of import jobs that completed",
    )
    .expect("metric creation failed")
});

pub static IMPORT_JOBS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_import_jobs_failed_total",
        "Total number of import jobs that failed",
    )
    .expect("metric creation failed")
});

pub static IMPORT_JOBS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_import_jobs_panicked_total",
        "Total number of import job tasks that panicked",
    )
    .expect("metric creation failed")
});

pub static IMPORT_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "hopper_import_jobs_active",
        "Number of import jobs currently processing",
    )
    .expect("metric creation failed")
});

pub static ROWS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_rows_processed_total",
        "Total number of rows processed by import jobs",
    )
    .expect("metric creation failed")
});

pub static ROW_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_row_errors_total",
        "Total number of rows recorded as errors",
    )
    .expect("metric creation failed")
});

pub static IMPORT_JOB_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hopper_import_job_duration_seconds",
            "Wall time from claiming an import job to its terminal state",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_STARTED.clone()),
            Box::new(UPLOAD_SESSIONS_EXPIRED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(CHUNKS_REDELIVERED.clone()),
            Box::new(BYTES_RECEIVED.clone()),
            Box::new(FILES_ASSEMBLED.clone()),
            Box::new(ASSEMBLY_FAILURES.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(IMPORT_JOBS_STARTED.clone()),
            Box::new(IMPORT_JOBS_COMPLETED.clone()),
            Box::new(IMPORT_JOBS_FAILED.clone()),
            Box::new(IMPORT_JOBS_PANICKED.clone()),
            Box::new(IMPORT_JOBS_ACTIVE.clone()),
            Box::new(ROWS_PROCESSED.clone()),
            Box::new(ROW_ERRORS.clone()),
            Box::new(IMPORT_JOB_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
