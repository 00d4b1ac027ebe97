//! Periodic removal of abandoned upload sessions.

use crate::assembler::{AssemblyError, ChunkAssembler};
use hopper_core::config::ServerConfig;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Sessions examined per metadata query.
const SWEEP_BATCH_SIZE: u32 = 100;

/// Run one sweep: remove open sessions idle for longer than the upload timeout.
pub async fn sweep_expired_sessions(
    assembler: &ChunkAssembler,
    config: &ServerConfig,
) -> Result<usize, AssemblyError> {
    let cutoff = OffsetDateTime::now_utc() - config.upload_timeout();
    assembler.expire_sessions(cutoff, SWEEP_BATCH_SIZE).await
}

/// Spawn the sweeper loop. Keep the handle alive for the server's lifetime.
pub fn spawn_sweeper(assembler: Arc<ChunkAssembler>, config: ServerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match sweep_expired_sessions(&assembler, &config).await {
                Ok(0) => tracing::debug!("No expired upload sessions"),
                Ok(removed) => tracing::info!(removed, "Expired upload sessions removed"),
                Err(e) => tracing::error!(error = %e, "Upload session sweep failed"),
            }
        }
    })
}
