use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::broadcast::StatusBroadcaster;
use super::db::{BuildDb, DbHandle};
use super::github::GitHubClient;
use super::release::ReleaseResolver;
use super::runner::{BuildRunner, RunnerSettings};
use super::service::BuildService;
use super::storage::FsObjectStore;
use super::sweeper;
use super::toolchain::PlatformIo;
use crate::config::AppConfig;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Wire the production collaborators and recover interrupted builds.
pub async fn build_service(config: &AppConfig) -> Result<Arc<BuildService>> {
    let db = BuildDb::new(&config.database.path).with_context(|| {
        format!(
            "Failed to open build database at {}",
            config.database.path.display()
        )
    })?;
    let github = Arc::new(GitHubClient::new(
        &config.github.api_url,
        config.github.auth.as_deref(),
    )?);
    let resolver = Arc::new(ReleaseResolver::new(
        github.clone(),
        config.releases.resolver_settings(),
    ));
    let store = Arc::new(FsObjectStore::new(
        &config.storage.root,
        &config.storage.bucket,
    ));
    let broadcaster = Arc::new(StatusBroadcaster::new(Duration::from_millis(
        config.build.status_window_ms,
    )));
    let mut settings = RunnerSettings {
        progress_interval: Duration::from_millis(config.build.progress_interval_ms),
        ..RunnerSettings::default()
    };
    if let Some(dir) = &config.build.scratch_dir {
        settings.scratch_root = dir.clone();
    }
    let runner = Arc::new(BuildRunner::new(
        github,
        Arc::new(PlatformIo::new(&config.build.pio_cmd)),
        store,
        broadcaster.clone(),
        settings,
    ));

    BuildService::start(DbHandle::new(db), resolver, runner, broadcaster).await
}

/// Start the build server and run until Ctrl+C.
pub async fn start_server(config: AppConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let service = build_service(&config).await?;
    let token = CancellationToken::new();
    let sweeper = config
        .sweep_interval()
        .map(|interval| sweeper::spawn(service.clone(), interval, token.clone()));

    let state = Arc::new(AppState {
        service: service.clone(),
    });
    let app = build_router(state, config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, bucket = %config.storage.bucket, "Firmware build server listening");

    // Close status streams before axum waits for open connections.
    let stopping = service.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stopping.shutdown().await;
        })
        .await
        .context("Server error");

    token.cancel();
    if let Some(handle) = sweeper {
        join_sweeper(handle).await;
    }
    service.shutdown().await;
    tracing::info!("Server shut down");
    result
}

/// Wait for the sweeper task. Returns `false` if it panicked or was
/// cancelled, after logging why.
async fn join_sweeper(handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Retention sweeper task ended abnormally");
            false
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
