//! Garbage collection of builds pinned to stale branch heads.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::models::FirmwareRelease;
use super::service::BuildService;
use super::storage::empty_directory;

/// Totals for one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub branches: usize,
    pub deleted_builds: usize,
    pub deleted_objects: usize,
    pub failed_branches: usize,
}

/// Delete every finished branch build whose commit is no longer the branch
/// head, together with its artifacts.
pub async fn sweep_once(service: &BuildService) -> SweepReport {
    let mut report = SweepReport::default();
    for release in service.resolver().catalog().branch_releases() {
        report.branches += 1;
        if let Err(e) = sweep_branch(service, &release, &mut report).await {
            report.failed_branches += 1;
            tracing::warn!(
                owner = %release.owner,
                repo = %release.repo,
                version = %release.version,
                error = %format!("{:#}", e),
                "Branch sweep failed"
            );
        }
    }
    if report.deleted_builds > 0 {
        tracing::info!(
            deleted_builds = report.deleted_builds,
            deleted_objects = report.deleted_objects,
            "Swept stale branch builds"
        );
    }
    report
}

async fn sweep_branch(
    service: &BuildService,
    release: &FirmwareRelease,
    report: &mut SweepReport,
) -> anyhow::Result<()> {
    // Straight to source control: a cached head would keep stale builds alive.
    let head = service
        .resolver()
        .source()
        .branch_head(&release.owner, &release.repo, &release.version)
        .await?;
    // Submissions after this sweep must build the head it kept.
    service
        .resolver()
        .observe_branch_head(&release.owner, &release.repo, &release.version, &head)
        .await;

    let (owner, repo, branch) = (
        release.owner.clone(),
        release.repo.clone(),
        release.version.clone(),
    );
    let builds = service
        .db()
        .call(move |db| db.list_builds_for_branch(&owner, &repo, &branch))
        .await?;

    for build in builds.into_iter().filter(|b| b.release_id != head) {
        let id = build.id.clone();
        tracing::debug!(build_id = %id, release_id = %build.release_id, head = %head, "Deleting stale build");
        service.db().call(move |db| db.delete_build(&id)).await?;
        report.deleted_builds += 1;
        report.deleted_objects += empty_directory(&**service.runner().store(), &build.id).await?;
    }
    Ok(())
}

/// Sweep now and then every `interval` until `token` is cancelled.
pub fn spawn(service: Arc<BuildService>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_once(&service).await;
                }
            }
        }
        tracing::debug!("Retention sweeper stopped");
    })
}
