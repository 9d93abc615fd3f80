//! Typed error hierarchy for the firmware build orchestrator.
//!
//! `BuildError` covers both sides of a build:
//! - submission-time failures (`ReleaseNotFound`, `InvalidConfiguration`)
//!   that are returned to the caller before any record exists
//! - task-time failures (`DownloadFailed`, `BuildToolFailed`, `UploadFailed`, ...)
//!   that the build task captures into a `FAILED` record and a status event

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Release {owner}/{repo}@{version} not found")]
    ReleaseNotFound {
        owner: String,
        repo: String,
        version: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to download source archive from {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Failed to extract source archive: {0}")]
    ExtractFailed(String),

    #[error("Build tool exited with code {code:?}: {output}")]
    BuildToolFailed { code: Option<i32>, output: String },

    #[error("Failed to read project metadata: {0}")]
    MetadataFailed(String),

    #[error("Failed to upload {key}: {message}")]
    UploadFailed { key: String, message: String },

    #[error("Failed to patch {}: {message}", path.display())]
    PatchFailed {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Build service is shutting down")]
    ShuttingDown,
}

impl BuildError {
    pub fn release_not_found(owner: &str, repo: &str, version: &str) -> Self {
        Self::ReleaseNotFound {
            owner: owner.to_string(),
            repo: repo.to_string(),
            version: version.to_string(),
        }
    }

    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is the caller's fault (bad release, bad config)
    /// rather than a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ReleaseNotFound { .. } | Self::InvalidConfiguration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_not_found_carries_coordinates() {
        let err = BuildError::release_not_found("SlimeVR", "SlimeVR-Tracker-ESP", "v9.9.9");
        match &err {
            BuildError::ReleaseNotFound {
                owner,
                repo,
                version,
            } => {
                assert_eq!(owner, "SlimeVR");
                assert_eq!(repo, "SlimeVR-Tracker-ESP");
                assert_eq!(version, "v9.9.9");
            }
            _ => panic!("Expected ReleaseNotFound"),
        }
        assert!(err.to_string().contains("SlimeVR/SlimeVR-Tracker-ESP@v9.9.9"));
    }

    #[test]
    fn build_tool_failed_reports_exit_code() {
        let err = BuildError::BuildToolFailed {
            code: Some(2),
            output: "error: compilation terminated".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Some(2)"));
        assert!(msg.contains("compilation terminated"));
    }

    #[test]
    fn io_error_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = BuildError::io("/tmp/build/src/debug.h", io_err);
        match &err {
            BuildError::Io { path, source } => {
                assert_eq!(path, &std::path::PathBuf::from("/tmp/build/src/debug.h"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn client_errors_are_distinguished() {
        assert!(BuildError::release_not_found("a", "b", "c").is_client_error());
        assert!(BuildError::InvalidConfiguration("no imus".into()).is_client_error());
        assert!(!BuildError::ShuttingDown.is_client_error());
        assert!(
            !BuildError::UploadFailed {
                key: "k".into(),
                message: "denied".into()
            }
            .is_client_error()
        );
    }

    #[test]
    fn build_error_implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BuildError::ShuttingDown);
        assert_std_error(&BuildError::Database(anyhow::anyhow!("locked")));
    }
}
