//! Build state machine: `BUILDING -> {DONE, FAILED}`.
//!
//! The service owns every build record. Submissions are normalized,
//! resolved, fingerprinted and deduplicated synchronously; accepted builds
//! run as detached tasks whose outcome the service writes back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::broadcast::StatusBroadcaster;
use super::db::{BuildLookup, DbHandle};
use super::fingerprint::fingerprint;
use super::models::*;
use super::normalize::{default_request, normalize, preview};
use super::release::ReleaseResolver;
use super::runner::BuildRunner;
use super::storage::empty_directory;
use crate::errors::BuildError;

pub const RESTART_MESSAGE: &str = "Build interrupted by server restart";
const RECORD_FAILED_MESSAGE: &str = "Build failed: could not record result";
pub const SHUTDOWN_MESSAGE: &str = "Build interrupted by server shutdown";

/// Handle to a detached build task.
#[derive(Clone)]
pub struct BuildTaskHandle {
    build_id: String,
    done: watch::Receiver<Option<BuildStatus>>,
    abort: AbortHandle,
}

impl BuildTaskHandle {
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some() || self.abort.is_finished()
    }

    /// Resolve to the terminal status. An aborted task counts as failed.
    pub async fn wait(&self) -> BuildStatus {
        let mut done = self.done.clone();
        match done.wait_for(Option::is_some).await {
            Ok(status) => status.unwrap_or(BuildStatus::Failed),
            Err(_) => BuildStatus::Failed,
        }
    }
}

pub struct BuildService {
    db: DbHandle,
    resolver: Arc<ReleaseResolver>,
    runner: Arc<BuildRunner>,
    broadcaster: Arc<StatusBroadcaster>,
    tasks: Arc<Mutex<HashMap<String, BuildTaskHandle>>>,
    stopping: CancellationToken,
}

impl BuildService {
    /// Recover from an unclean stop, then return a service ready for
    /// submissions. Records left `BUILDING` by a previous process are failed
    /// before anything else can touch them.
    pub async fn start(
        db: DbHandle,
        resolver: Arc<ReleaseResolver>,
        runner: Arc<BuildRunner>,
        broadcaster: Arc<StatusBroadcaster>,
    ) -> anyhow::Result<Arc<Self>> {
        let recovered = db
            .call(|db| db.fail_building_builds(RESTART_MESSAGE))
            .await?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Failed builds interrupted by restart");
        }
        Ok(Arc::new(Self {
            db,
            resolver,
            runner,
            broadcaster,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            stopping: CancellationToken::new(),
        }))
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn resolver(&self) -> &Arc<ReleaseResolver> {
        &self.resolver
    }

    pub fn runner(&self) -> &Arc<BuildRunner> {
        &self.runner
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Submit a build. Returns the existing record when an equivalent build
    /// is in flight or done, else starts a new one.
    pub async fn submit(&self, request: BuildRequest) -> Result<BuildResponse, BuildError> {
        if self.stopping.is_cancelled() {
            return Err(BuildError::ShuttingDown);
        }

        let mut config = normalize(request, self.resolver.catalog())?;
        config.release = self.resolver.redirect(config.release);
        let release = self.resolver.resolve(&config.release).await?;
        let fp = fingerprint(&config);

        let release_id = release.id.clone();
        let snapshot = config.clone();
        let lookup = self
            .db
            .call(move |db| db.create_or_reuse_build(&fp, &release_id, &snapshot))
            .await
            .map_err(BuildError::Database)?;

        match lookup {
            BuildLookup::Existing(record) => {
                tracing::info!(
                    build_id = %record.id,
                    status = record.status.as_str(),
                    "Reusing existing build"
                );
                Ok(BuildResponse::from(&record))
            }
            BuildLookup::Created(record) => {
                tracing::info!(
                    build_id = %record.id,
                    owner = %config.release.owner,
                    repo = %config.release.repo,
                    version = %config.release.version,
                    release_id = %release.id,
                    board = %config.board.board_type,
                    "Starting build"
                );
                self.spawn_build(record.id.clone(), config, release);
                Ok(BuildResponse::from(&record))
            }
        }
    }

    fn spawn_build(&self, build_id: String, config: BuildConfiguration, release: ResolvedRelease) {
        let (done_tx, done_rx) = watch::channel(None);
        let db = self.db.clone();
        let runner = self.runner.clone();
        let broadcaster = self.broadcaster.clone();
        let id = build_id.clone();

        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|_, handle| !handle.is_finished());

        let join = tokio::spawn(async move {
            let status = match runner.run(&id, &config, &release).await {
                Ok(files) => {
                    let stored = files.clone();
                    let build_id = id.clone();
                    match db.call(move |db| db.complete_build(&build_id, &stored)).await {
                        Ok(Some(_)) => {
                            tracing::info!(build_id = %id, partitions = files.len(), "Build complete");
                            broadcaster.publish(StatusEvent::done(&id, files));
                            BuildStatus::Done
                        }
                        Ok(None) => {
                            tracing::warn!(build_id = %id, "Build record already finalized, discarding artifacts");
                            remove_artifacts(&runner, &id).await;
                            BuildStatus::Failed
                        }
                        Err(e) => {
                            tracing::error!(build_id = %id, error = %format!("{:#}", e), "Failed to record build result");
                            remove_artifacts(&runner, &id).await;
                            record_failure(&db, &broadcaster, &id, RECORD_FAILED_MESSAGE).await;
                            BuildStatus::Failed
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(build_id = %id, error = %e, "Build failed");
                    record_failure(&db, &broadcaster, &id, &format!("Build failed: {}", e)).await;
                    BuildStatus::Failed
                }
            };
            let _ = done_tx.send(Some(status));
        });

        tasks.insert(
            build_id.clone(),
            BuildTaskHandle {
                build_id,
                done: done_rx,
                abort: join.abort_handle(),
            },
        );
    }

    /// Handle of a build started by this process, while it is tracked.
    pub fn task(&self, build_id: &str) -> Option<BuildTaskHandle> {
        self.tasks.lock().ok()?.get(build_id).cloned()
    }

    pub fn running_builds(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Defaults a bare request for `board` would be built with.
    pub fn default_config(&self, board: BoardType) -> Result<BuildConfiguration, BuildError> {
        let catalog = self.resolver.catalog();
        preview(default_request(board, catalog), catalog)
    }

    pub async fn list_versions(&self) -> Vec<ResolvedRelease> {
        self.resolver.list_all_releases().await
    }

    pub async fn get_build(&self, id: &str) -> anyhow::Result<Option<BuildRecord>> {
        let id = id.to_string();
        self.db.call(move |db| db.get_build(&id)).await
    }

    pub async fn list_builds(&self) -> anyhow::Result<Vec<BuildRecord>> {
        self.db.call(|db| db.list_done_builds()).await
    }

    /// Status events for a build. A build that already finished yields its
    /// terminal event once; an unknown id yields nothing.
    pub async fn status_stream(&self, id: &str) -> BoxStream<'static, StatusEvent> {
        // Subscribe before reading the record so a completion between the
        // two cannot be missed.
        let live = self.broadcaster.subscribe(id);
        match self.get_build(id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                let event = match record.status {
                    BuildStatus::Done => StatusEvent::done(&record.id, record.firmware_files),
                    _ => StatusEvent::failed(
                        &record.id,
                        record.message.unwrap_or_else(|| "Build failed".to_string()),
                    ),
                };
                futures::stream::once(async move { event }).boxed()
            }
            Ok(Some(_)) => live.boxed(),
            Ok(None) => futures::stream::empty().boxed(),
            Err(e) => {
                tracing::warn!(build_id = id, error = %format!("{:#}", e), "Failed to read build for status stream");
                live.boxed()
            }
        }
    }

    /// Stop accepting builds, abort running ones (recording them as failed)
    /// and close every status subscription.
    pub async fn shutdown(&self) {
        self.stopping.cancel();
        let handles: Vec<BuildTaskHandle> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().map(|(_, h)| h).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles.into_iter().filter(|h| !h.is_finished()) {
            handle.abort.abort();
            tracing::warn!(build_id = %handle.build_id, "Aborting build for shutdown");
            if record_failure(&self.db, &self.broadcaster, &handle.build_id, SHUTDOWN_MESSAGE).await {
                remove_artifacts(&self.runner, &handle.build_id).await;
            }
        }
        self.broadcaster.shutdown();
    }
}

/// Mark a `BUILDING` record failed and announce it. Returns `false` when the
/// record had already reached a terminal state and nothing was published.
async fn record_failure(db: &DbHandle, broadcaster: &StatusBroadcaster, id: &str, message: &str) -> bool {
    let (build_id, stored) = (id.to_string(), message.to_string());
    match db.call(move |db| db.fail_build(&build_id, &stored)).await {
        Ok(Some(_)) => {
            broadcaster.publish(StatusEvent::failed(id, message));
            true
        }
        Ok(None) => {
            tracing::debug!(build_id = %id, "Build already finished, not marking failed");
            false
        }
        Err(e) => {
            tracing::error!(build_id = %id, error = %format!("{:#}", e), "Failed to record build failure");
            broadcaster.publish(StatusEvent::failed(id, message));
            true
        }
    }
}

async fn remove_artifacts(runner: &BuildRunner, id: &str) {
    if let Err(e) = empty_directory(&**runner.store(), id).await {
        tracing::warn!(build_id = %id, error = %format!("{:#}", e), "Failed to remove build artifacts");
    }
}
