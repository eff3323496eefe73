use anyhow::{Context, Result};
use std::sync::Arc;
use telemon_common::proto::metrics_server::MetricsServer;
use telemon_server::app;
use telemon_server::config::ServerConfig;
use telemon_server::grpc::MetricsService;
use telemon_server::state::AppState;
use telemon_storage::db::DbStorage;
use telemon_storage::memory::MemStorage;
use telemon_storage::snapshot::{self, SnapshotTask, SyncSaveStorage};
use telemon_storage::Storage;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    tracing::info!(
        http = %config.address,
        grpc = %config.grpc_address,
        db = config.redacted_dsn().as_deref().unwrap_or("-"),
        snapshot = %config.file_storage_path.display(),
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "telemon-server starting"
    );

    let cancel = CancellationToken::new();
    let (storage, snapshot_task) = open_storage(&config, cancel.clone()).await?;
    tracing::info!(backend = storage.backend(), "Storage ready");

    let state = AppState::from_config(&config, storage)?;

    let grpc_addr = config.grpc_addr()?;
    let grpc_shutdown = cancel.clone();
    let grpc_server = TonicServer::builder()
        .add_service(MetricsServer::new(MetricsService::new(state.clone())))
        .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await });

    let http_addr = config.http_addr()?;
    let app = app::build_http_app(state, config.request_timeout());
    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;
    let http_shutdown = cancel.clone();
    let http_server = axum::serve(http_listener, app)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

    tracing::info!(%http_addr, %grpc_addr, "Listening");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutting down gracefully");
        signal_cancel.cancel();
    });

    // Either server stopping on its own also stops the other.
    let grpc = async {
        if let Err(e) = grpc_server.await {
            tracing::error!(error = %e, "gRPC server error");
        }
        cancel.cancel();
    };
    let http = async {
        if let Err(e) = http_server.await {
            tracing::error!(error = %e, "HTTP server error");
        }
        cancel.cancel();
    };
    tokio::join!(grpc, http);

    if let Some(handle) = snapshot_task {
        handle.await.context("snapshot task panicked")?;
    }
    tracing::info!("telemon-server stopped");
    Ok(())
}

/// The relational backend when a DSN is configured, otherwise the in-process
/// one with optional restore and the snapshot task. A zero store interval
/// saves synchronously after every update instead of periodically.
async fn open_storage(
    config: &ServerConfig,
    cancel: CancellationToken,
) -> Result<(Arc<dyn Storage>, Option<JoinHandle<()>>)> {
    if let Some(dsn) = &config.database_dsn {
        let storage = DbStorage::connect(dsn)
            .await
            .context("failed to open database storage")?;
        return Ok((Arc::new(storage), None));
    }

    let mut storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
    if config.restore {
        snapshot::load(&config.file_storage_path, storage.as_ref())
            .await
            .context("failed to restore snapshot")?;
    }
    if config.store_interval().is_zero() {
        tracing::info!("Saving snapshot after every update");
        storage = Arc::new(SyncSaveStorage::new(storage, &config.file_storage_path));
    }
    let task = SnapshotTask::new(
        storage.clone(),
        &config.file_storage_path,
        config.store_interval(),
    );
    Ok((storage, Some(tokio::spawn(task.run(cancel)))))
}
