//! A real import server on a local port.

use hopper_core::config::AppConfig;
use hopper_metadata::{MetadataStore, SqliteStore};
use hopper_server::state::JobTaskRegistry;
use hopper_server::{AppState, create_router};
use hopper_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Whether this environment lets tests listen on loopback.
#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

#[allow(dead_code)]
pub struct LiveServer {
    pub base_url: String,
    pub state: AppState,
    handle: JoinHandle<()>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl LiveServer {
    pub async fn start() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        config.import.required_columns = vec!["nombre".to_string()];

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("storage"))
                .await
                .expect("Failed to create storage backend"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp_dir.path().join("metadata.db"))
                .await
                .expect("Failed to create metadata store"),
        );
        let registry = Arc::new(JobTaskRegistry::new(metadata.clone()));
        let state = AppState::new(config, storage, metadata, registry);
        let router = create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
            _temp_dir: temp_dir,
        }
    }
}

impl Drop for LiveServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
