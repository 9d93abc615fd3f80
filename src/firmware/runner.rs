//! The build task: download, extract, patch, compile, collect partitions,
//! upload. Every step publishes a `BUILDING` status event. The outcome is
//! returned to the caller, which owns the build record.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::broadcast::StatusBroadcaster;
use super::defines::{apply_debug, render};
use super::models::{BuildConfiguration, DebugFlags, FirmwareFile, ResolvedRelease, StatusEvent};
use super::release::SourceControl;
use super::storage::ObjectStore;
use super::toolchain::Toolchain;
use crate::errors::BuildError;

/// Headers whose debug macros follow the build configuration.
const DEBUG_HEADERS: &[&str] = &["debug.h", "defines_bmi160.h"];

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Directory under which each build gets its own scratch directory.
    pub scratch_root: PathBuf,
    /// Minimum interval between two progress events while compiling.
    pub progress_interval: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("firmware-forge"),
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Scratch directory removed on drop. Removal failures are logged with the
/// path so the directory can be cleaned up by hand.
struct ScratchDir {
    dir: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> Result<Self, BuildError> {
        std::fs::create_dir_all(root).map_err(|e| BuildError::io(root, e))?;
        let dir = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(root)
            .map_err(|e| BuildError::io(root, e))?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove scratch directory, remove it manually"
                );
            }
        }
    }
}

pub struct BuildRunner {
    source: Arc<dyn SourceControl>,
    toolchain: Arc<dyn Toolchain>,
    store: Arc<dyn ObjectStore>,
    broadcaster: Arc<StatusBroadcaster>,
    settings: RunnerSettings,
}

impl BuildRunner {
    pub fn new(
        source: Arc<dyn SourceControl>,
        toolchain: Arc<dyn Toolchain>,
        store: Arc<dyn ObjectStore>,
        broadcaster: Arc<StatusBroadcaster>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            source,
            toolchain,
            store,
            broadcaster,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn progress(&self, build_id: &str, message: &str) {
        tracing::info!(build_id, "{}", message);
        self.broadcaster
            .publish(StatusEvent::building(build_id, message));
    }

    pub async fn run(
        &self,
        build_id: &str,
        config: &BuildConfiguration,
        release: &ResolvedRelease,
    ) -> Result<Vec<FirmwareFile>, BuildError> {
        self.progress(build_id, "Creating temporary build folder");
        let scratch = ScratchDir::create(&self.settings.scratch_root)?;

        self.progress(build_id, "Downloading firmware source");
        let archive = self
            .source
            .fetch_archive(&release.archive_url)
            .await
            .map_err(|e| BuildError::DownloadFailed {
                url: release.archive_url.clone(),
                message: format!("{:#}", e),
            })?;

        self.progress(build_id, "Extracting firmware");
        let extract_to = scratch.path().join("source");
        let project_dir = tokio::task::spawn_blocking(move || extract_archive(archive, &extract_to))
            .await
            .map_err(|e| BuildError::ExtractFailed(format!("extract task panicked: {}", e)))??;

        self.progress(build_id, "Setting up defines and configs");
        prepare_project(build_id, &project_dir, config).await?;

        self.progress(build_id, "Building firmware (this might take a minute)");
        self.compile(build_id, &project_dir, config, &release.id).await?;

        self.progress(build_id, "Uploading firmware to bucket");
        let partitions = self
            .toolchain
            .partitions(&project_dir, config.board.board_type)
            .await?;
        let uploads = partitions.iter().enumerate().map(|(index, partition)| {
            let key = format!("{}/firmware-part-{}.bin", build_id, index);
            async move {
                let data = tokio::fs::read(&partition.path)
                    .await
                    .map_err(|e| BuildError::io(&partition.path, e))?;
                self.store
                    .put(&key, Bytes::from(data))
                    .await
                    .map_err(|e| BuildError::UploadFailed {
                        key: key.clone(),
                        message: format!("{:#}", e),
                    })?;
                Ok::<_, BuildError>(FirmwareFile {
                    offset: partition.offset,
                    url: format!("{}/{}", self.store.bucket(), key),
                })
            }
        });
        let files = futures::future::try_join_all(uploads).await?;

        drop(scratch);
        Ok(files)
    }

    async fn compile(
        &self,
        build_id: &str,
        project_dir: &Path,
        config: &BuildConfiguration,
        git_rev: &str,
    ) -> Result<(), BuildError> {
        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
        let interval = self.settings.progress_interval;

        let build = self
            .toolchain
            .build(project_dir, config.board.board_type, git_rev, log_tx);
        let relay = async {
            let mut last_event: Option<Instant> = None;
            while let Some(line) = log_rx.recv().await {
                tracing::debug!(target: "firmware_forge::build_log", build_id, "{}", line);
                if last_event.is_none_or(|at| at.elapsed() >= interval) {
                    last_event = Some(Instant::now());
                    self.broadcaster.publish(StatusEvent::building(
                        build_id,
                        "Building firmware (this might take a minute)",
                    ));
                }
            }
        };

        let (result, ()) = tokio::join!(build, relay);
        result
    }
}

/// Unpack a `.tar.gz` source archive into `dest` and return its single
/// top-level directory.
pub fn extract_archive(archive: Bytes, dest: &Path) -> Result<PathBuf, BuildError> {
    std::fs::create_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;
    let decoder = flate2::read::GzDecoder::new(Cursor::new(archive));
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| BuildError::ExtractFailed(e.to_string()))?;

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dest).map_err(|e| BuildError::io(dest, e))? {
        let entry = entry.map_err(|e| BuildError::io(dest, e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        0 => Err(BuildError::ExtractFailed(
            "archive has no top-level directory".to_string(),
        )),
        n => Err(BuildError::ExtractFailed(format!(
            "archive has {} top-level directories",
            n
        ))),
    }
}

/// Swap in the tools-only PlatformIO config, write the generated defines
/// and patch the debug headers. Header patch failures are logged only.
async fn prepare_project(
    build_id: &str,
    project_dir: &Path,
    config: &BuildConfiguration,
) -> Result<(), BuildError> {
    let ini = project_dir.join("platformio.ini");
    let tools_ini = project_dir.join("platformio-tools.ini");
    if tokio::fs::try_exists(&tools_ini).await.unwrap_or(false) {
        tokio::fs::rename(&tools_ini, &ini)
            .await
            .map_err(|e| BuildError::io(&tools_ini, e))?;
    } else {
        tracing::warn!(build_id, "No platformio-tools.ini in release, keeping platformio.ini");
    }

    let src = project_dir.join("src");
    let defines = render(config);
    tracing::debug!(build_id, defines = %defines, "Generated defines");
    let defines_path = src.join("defines.h");
    tokio::fs::write(&defines_path, defines)
        .await
        .map_err(|e| BuildError::io(&defines_path, e))?;

    for header in DEBUG_HEADERS {
        let path = src.join(header);
        if let Err(e) = patch_debug_header(&path, &config.debug).await {
            tracing::warn!(build_id, error = %e, "Debug header left unpatched");
        }
    }
    Ok(())
}

async fn patch_debug_header(path: &Path, debug: &DebugFlags) -> Result<(), BuildError> {
    let patch_failed = |e: std::io::Error| BuildError::PatchFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let contents = tokio::fs::read_to_string(path).await.map_err(patch_failed)?;
    tokio::fs::write(path, apply_debug(&contents, debug))
        .await
        .map_err(patch_failed)
}
