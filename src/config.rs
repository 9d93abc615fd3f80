//! Configuration for the firmware build server.
//!
//! Read from `firmware-forge.toml`, then overridden by environment variables
//! (a `.env` file is honoured), then by CLI flags.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! dev_mode = false
//!
//! [database]
//! path = "data/firmware-forge.db"
//!
//! [storage]
//! root = "data/storage"
//! bucket = "builds"
//!
//! [github]
//! api_url = "https://api.github.com"
//! auth = "ghp_..."
//!
//! [build]
//! pio_cmd = "platformio"
//! progress_interval_ms = 1000
//! status_window_ms = 500
//!
//! [sweeper]
//! enabled = true
//! interval_secs = 300
//!
//! [releases]
//! cache_ttl_secs = 300
//! official_owner = "SlimeVR"
//! default_repo = "SlimeVR-Tracker-ESP"
//! hidden = ["SlimeVR/v0.2.0"]
//!
//! [[releases.repos]]
//! owner = "SlimeVR"
//! repo = "SlimeVR-Tracker-ESP"
//! branches = [{ branch = "main", description = "Latest development build" }]
//!
//! [[releases.redirects]]
//! from_owner = "SlimeVR"
//! from_version = "v0.3.3"
//! to_owner = "ButterscotchV"
//! to_version = "v0.3.3-bno-patched"
//!
//! [log]
//! level = "info"
//! json = false
//! dir = "logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::firmware::github::DEFAULT_API_URL;
use crate::firmware::release::{
    CatalogRepo, ReleaseCatalog, ReleaseRedirect, ResolverSettings, default_hidden_releases,
    default_redirects,
};

pub const DEFAULT_CONFIG_FILE: &str = "firmware-forge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/firmware-forge.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory holding one sub-directory per bucket.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/storage")
}

fn default_bucket() -> String {
    "builds".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Personal access token or `user:token` pair.
    #[serde(default)]
    pub auth: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            auth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Build tool command line; extra words are passed before the subcommand.
    #[serde(default = "default_pio_cmd")]
    pub pio_cmd: String,
    /// Parent of the per-build scratch directories. Defaults to the system
    /// temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Minimum gap between compiler progress events.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Coalescing window for status events.
    #[serde(default = "default_status_window_ms")]
    pub status_window_ms: u64,
}

fn default_pio_cmd() -> String {
    "platformio".to_string()
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_status_window_ms() -> u64 {
    500
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            pio_cmd: default_pio_cmd(),
            scratch_dir: None,
            progress_interval_ms: default_progress_interval_ms(),
            status_window_ms: default_status_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasesSection {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_official_owner")]
    pub official_owner: String,
    #[serde(default = "default_repo")]
    pub default_repo: String,
    #[serde(default = "default_repos")]
    pub repos: Vec<CatalogRepo>,
    #[serde(default = "default_redirects")]
    pub redirects: Vec<ReleaseRedirect>,
    /// `owner/release-name` entries never listed or built.
    #[serde(default = "default_hidden_releases")]
    pub hidden: Vec<String>,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_official_owner() -> String {
    ReleaseCatalog::default().official_owner
}

fn default_repo() -> String {
    ReleaseCatalog::default().default_repo
}

fn default_repos() -> Vec<CatalogRepo> {
    ReleaseCatalog::default().repos
}

impl Default for ReleasesSection {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            official_owner: default_official_owner(),
            default_repo: default_repo(),
            repos: default_repos(),
            redirects: default_redirects(),
            hidden: default_hidden_releases(),
        }
    }
}

impl ReleasesSection {
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            catalog: ReleaseCatalog {
                official_owner: self.official_owner.clone(),
                default_repo: self.default_repo.clone(),
                repos: self.repos.clone(),
            },
            redirects: self.redirects.clone(),
            hidden: self.hidden.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// Root of `firmware-forge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub sweeper: SweeperSection,
    #[serde(default)]
    pub releases: ReleasesSection,
    #[serde(default)]
    pub log: LogSection,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse firmware-forge.toml")
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", port))?;
        }
        if let Some(host) = lookup("LISTEN_HOST") {
            self.server.host = host;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(root) = lookup("STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(bucket) = lookup("S3_BUILDS_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(auth) = lookup("GITHUB_AUTH") {
            self.github.auth = Some(auth).filter(|a| !a.trim().is_empty());
        }
        if let Some(url) = lookup("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(cmd) = lookup("PIO_CMD") {
            self.build.pio_cmd = cmd;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.storage.bucket.trim().is_empty() {
            warnings.push("storage.bucket is empty; artifact URLs will have no bucket prefix".to_string());
        }
        if self.build.pio_cmd.trim().is_empty() {
            warnings.push("build.pio_cmd is empty".to_string());
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            warnings.push("sweeper.interval_secs is 0; the sweeper will be disabled".to_string());
        }
        if !self
            .releases
            .repos
            .iter()
            .any(|r| r.owner == self.releases.official_owner)
        {
            warnings.push(format!(
                "No catalog repo is owned by official_owner '{}'; no tagged releases will be listed",
                self.releases.official_owner
            ));
        }
        for hidden in &self.releases.hidden {
            if !hidden.contains('/') {
                warnings.push(format!(
                    "Hidden release '{}' should be written as owner/release-name",
                    hidden
                ));
            }
        }
        for redirect in &self.releases.redirects {
            if redirect.from_owner == redirect.to_owner && redirect.from_version == redirect.to_version {
                warnings.push(format!(
                    "Redirect {}/{} points at itself",
                    redirect.from_owner, redirect.from_version
                ));
            }
        }

        warnings
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweeper.enabled && self.sweeper.interval_secs > 0)
            .then(|| Duration::from_secs(self.sweeper.interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.bucket, "builds");
        assert_eq!(config.build.pio_cmd, "platformio");
        assert_eq!(config.build.status_window_ms, 500);
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.releases.official_owner, "SlimeVR");
        assert_eq!(config.releases.redirects.len(), 1);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let content = r#"
[server]
port = 8080

[build]
pio_cmd = "python -m platformio"

[sweeper]
enabled = false
"#;
        let config = AppConfig::parse(content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.build.pio_cmd, "python -m platformio");
        assert_eq!(config.build.progress_interval_ms, 1000);
        assert!(config.sweep_interval().is_none());
    }

    #[test]
    fn test_release_catalog_from_toml() {
        let content = r#"
[releases]
cache_ttl_secs = 60
hidden = []

[[releases.repos]]
owner = "SlimeVR"
repo = "SlimeVR-Tracker-ESP"
branches = [
    { branch = "main", description = "Latest development build" },
    { branch = "next" },
]
"#;
        let config = AppConfig::parse(content).unwrap();
        let settings = config.releases.resolver_settings();
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
        assert!(settings.hidden.is_empty());
        assert_eq!(settings.catalog.repos.len(), 1);
        assert_eq!(settings.catalog.repos[0].branches[1].branch, "next");
        assert_eq!(settings.catalog.repos[0].branches[1].description, "");
        assert_eq!(settings.catalog.default_repo, "SlimeVR-Tracker-ESP");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "4000"),
            ("S3_BUILDS_BUCKET", "firmware"),
            ("GITHUB_AUTH", "ghp_secret"),
            ("PIO_CMD", "pio"),
            ("DATABASE_PATH", "/var/lib/ff/builds.db"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.storage.bucket, "firmware");
        assert_eq!(config.github.auth.as_deref(), Some("ghp_secret"));
        assert_eq!(config.build.pio_cmd, "pio");
        assert_eq!(config.database.path, PathBuf::from("/var/lib/ff/builds.db"));
        assert_eq!(config.github.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_invalid_port_override_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|k| (k == "PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid PORT"));
    }

    #[test]
    fn test_blank_github_auth_is_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| (k == "GITHUB_AUTH").then(|| "  ".to_string()))
            .unwrap();
        assert!(config.github.auth.is_none());
    }

    #[test]
    fn test_validate_warnings() {
        let content = r#"
[storage]
bucket = ""

[sweeper]
interval_secs = 0

[releases]
official_owner = "Nobody"
hidden = ["v0.2.0"]
"#;
        let warnings = AppConfig::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("storage.bucket")));
        assert!(warnings.iter().any(|w| w.contains("interval_secs")));
        assert!(warnings.iter().any(|w| w.contains("official_owner 'Nobody'")));
        assert!(warnings.iter().any(|w| w.contains("owner/release-name")));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&tmp.path().join("missing.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("firmware-forge.toml");
        std::fs::write(&path, "[server]\nport = \"high\"\n").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }
}
