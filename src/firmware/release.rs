//! Release catalog and resolution of release coordinates to an immutable
//! commit or tag.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::models::{FirmwareRelease, ReleaseRequest, ResolvedRelease};
use crate::errors::BuildError;

// ── Source control collaborator ───────────────────────────────────────

/// A published release as reported by source control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteRelease {
    pub name: String,
    pub tag_name: String,
    pub tarball_url: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn list_releases(&self, owner: &str, repo: &str) -> anyhow::Result<Vec<RemoteRelease>>;

    /// Commit SHA currently at the head of `branch`.
    async fn branch_head(&self, owner: &str, repo: &str, branch: &str) -> anyhow::Result<String>;

    async fn fetch_archive(&self, url: &str) -> anyhow::Result<Bytes>;
}

pub fn branch_archive_url(owner: &str, repo: &str, branch: &str) -> String {
    format!(
        "https://github.com/{}/{}/archive/refs/heads/{}.tar.gz",
        owner, repo, branch
    )
}

// ── Catalog ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogBranch {
    pub branch: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogRepo {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub branches: Vec<CatalogBranch>,
}

/// Firmware repositories this server builds from, and their known branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseCatalog {
    /// Owner whose tagged releases are all listed.
    pub official_owner: String,
    /// Repository assumed when a request names only an owner.
    pub default_repo: String,
    pub repos: Vec<CatalogRepo>,
}

impl Default for ReleaseCatalog {
    fn default() -> Self {
        Self {
            official_owner: "SlimeVR".to_string(),
            default_repo: "SlimeVR-Tracker-ESP".to_string(),
            repos: vec![
                CatalogRepo {
                    owner: "SlimeVR".to_string(),
                    repo: "SlimeVR-Tracker-ESP".to_string(),
                    branches: vec![CatalogBranch {
                        branch: "main".to_string(),
                        description: "Latest development build".to_string(),
                    }],
                },
                CatalogRepo {
                    owner: "ButterscotchV".to_string(),
                    repo: "SlimeVR-Tracker-ESP".to_string(),
                    branches: vec![],
                },
            ],
        }
    }
}

impl ReleaseCatalog {
    pub fn branch(&self, owner: &str, repo: &str, branch: &str) -> Option<&CatalogBranch> {
        self.repos
            .iter()
            .filter(|r| r.owner == owner && r.repo == repo)
            .flat_map(|r| r.branches.iter())
            .find(|b| b.branch == branch)
    }

    /// First repo of `owner` that lists `version` as a branch.
    pub fn repo_for_branch(&self, owner: &str, version: &str) -> Option<&str> {
        self.repos
            .iter()
            .find(|r| r.owner == owner && r.branches.iter().any(|b| b.branch == version))
            .map(|r| r.repo.as_str())
    }

    /// Every catalog branch as a complete branch release.
    pub fn branch_releases(&self) -> Vec<FirmwareRelease> {
        self.repos
            .iter()
            .flat_map(|r| {
                r.branches.iter().map(move |b| {
                    self.complete(ReleaseRequest {
                        owner: r.owner.clone(),
                        repo: Some(r.repo.clone()),
                        version: b.branch.clone(),
                        is_branch: Some(true),
                        description: Some(b.description.clone()),
                        url: None,
                    })
                })
            })
            .collect()
    }

    /// Fill in the optional release coordinates from the catalog.
    pub fn complete(&self, request: ReleaseRequest) -> FirmwareRelease {
        let ReleaseRequest {
            owner,
            repo,
            version,
            is_branch,
            description,
            url,
        } = request;

        let repo = repo.unwrap_or_else(|| {
            self.repo_for_branch(&owner, &version)
                .unwrap_or(&self.default_repo)
                .to_string()
        });
        let catalog_branch = self.branch(&owner, &repo, &version);
        let is_branch = is_branch.unwrap_or(catalog_branch.is_some());
        let description = match description {
            Some(d) => Some(d),
            None if is_branch => catalog_branch.map(|b| b.description.clone()),
            None => None,
        };
        let url = url.unwrap_or_else(|| {
            if is_branch {
                format!("https://github.com/{}/{}/tree/{}", owner, repo, version)
            } else {
                format!(
                    "https://github.com/{}/{}/releases/tag/{}",
                    owner, repo, version
                )
            }
        });

        FirmwareRelease {
            owner,
            repo,
            version,
            is_branch,
            description,
            url,
        }
    }
}

/// Replace a release with a patched one before it is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseRedirect {
    pub from_owner: String,
    pub from_version: String,
    pub to_owner: String,
    pub to_version: String,
}

pub fn default_redirects() -> Vec<ReleaseRedirect> {
    vec![ReleaseRedirect {
        from_owner: "SlimeVR".to_string(),
        from_version: "v0.3.3".to_string(),
        to_owner: "ButterscotchV".to_string(),
        to_version: "v0.3.3-bno-patched".to_string(),
    }]
}

pub fn default_hidden_releases() -> Vec<String> {
    ["SlimeVR/v0.2.0", "SlimeVR/v0.2.1", "SlimeVR/v0.2.2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ── TTL cache ─────────────────────────────────────────────────────────

struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert `value`, dropping every expired entry on the way.
    async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (at, _)| at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }
}

// ── Resolver ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub catalog: ReleaseCatalog,
    pub redirects: Vec<ReleaseRedirect>,
    /// `owner/release-name` pairs never offered or built.
    pub hidden: Vec<String>,
    pub cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            catalog: ReleaseCatalog::default(),
            redirects: default_redirects(),
            hidden: default_hidden_releases(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

type ResolveKey = (String, String, String, bool);

pub struct ReleaseResolver {
    source: Arc<dyn SourceControl>,
    settings: ResolverSettings,
    resolved: TtlCache<ResolveKey, ResolvedRelease>,
    releases: TtlCache<(String, String), Vec<RemoteRelease>>,
}

impl ReleaseResolver {
    pub fn new(source: Arc<dyn SourceControl>, settings: ResolverSettings) -> Self {
        let ttl = settings.cache_ttl;
        Self {
            source,
            settings,
            resolved: TtlCache::new(ttl),
            releases: TtlCache::new(ttl),
        }
    }

    pub fn catalog(&self) -> &ReleaseCatalog {
        &self.settings.catalog
    }

    pub fn source(&self) -> &Arc<dyn SourceControl> {
        &self.source
    }

    /// Apply the redirect table. Returns the release unchanged when no
    /// redirect matches.
    pub fn redirect(&self, release: FirmwareRelease) -> FirmwareRelease {
        let hit = self
            .settings
            .redirects
            .iter()
            .find(|r| r.from_owner == release.owner && r.from_version == release.version);
        match hit {
            Some(r) => {
                tracing::info!(
                    from = %format!("{}/{}", r.from_owner, r.from_version),
                    to = %format!("{}/{}", r.to_owner, r.to_version),
                    "Redirecting release"
                );
                self.settings.catalog.complete(ReleaseRequest {
                    owner: r.to_owner.clone(),
                    version: r.to_version.clone(),
                    ..Default::default()
                })
            }
            None => release,
        }
    }

    pub async fn resolve(&self, release: &FirmwareRelease) -> Result<ResolvedRelease, BuildError> {
        let resolved = self
            .resolve_version(
                &release.owner,
                &release.repo,
                &release.version,
                Some(release.is_branch),
            )
            .await?;
        Ok(ResolvedRelease {
            release: release.clone(),
            ..resolved
        })
    }

    /// Pin `(owner, repo, version)` to a commit SHA (branches) or tag.
    /// Without a hint, `version` is a branch iff the catalog lists it.
    pub async fn resolve_version(
        &self,
        owner: &str,
        repo: &str,
        version: &str,
        is_branch: Option<bool>,
    ) -> Result<ResolvedRelease, BuildError> {
        let is_branch =
            is_branch.unwrap_or_else(|| self.settings.catalog.branch(owner, repo, version).is_some());
        let key = (
            owner.to_string(),
            repo.to_string(),
            version.to_string(),
            is_branch,
        );
        if let Some(hit) = self.resolved.get(&key).await {
            return Ok(hit);
        }

        let release = self.settings.catalog.complete(ReleaseRequest {
            owner: owner.to_string(),
            repo: Some(repo.to_string()),
            version: version.to_string(),
            is_branch: Some(is_branch),
            description: None,
            url: None,
        });

        let resolved = if is_branch {
            let sha = self
                .source
                .branch_head(owner, repo, version)
                .await
                .map_err(|e| {
                    tracing::warn!(owner, repo, version, error = %format!("{:#}", e), "Failed to fetch branch head");
                    BuildError::release_not_found(owner, repo, version)
                })?;
            ResolvedRelease {
                release,
                id: sha,
                archive_url: branch_archive_url(owner, repo, version),
            }
        } else {
            let releases = self.releases(owner, repo).await.map_err(|e| {
                tracing::warn!(owner, repo, version, error = %format!("{:#}", e), "Failed to list releases");
                BuildError::release_not_found(owner, repo, version)
            })?;
            let found = releases
                .into_iter()
                .find(|r| r.name == version || r.tag_name == version)
                .ok_or_else(|| BuildError::release_not_found(owner, repo, version))?;
            ResolvedRelease {
                release,
                id: found.tag_name,
                archive_url: found.tarball_url,
            }
        };

        self.resolved.insert(key, resolved.clone()).await;
        Ok(resolved)
    }

    /// Record a branch head observed outside `resolve`, replacing whatever
    /// commit the cache held for that branch.
    pub async fn observe_branch_head(&self, owner: &str, repo: &str, branch: &str, sha: &str) {
        let release = self.settings.catalog.complete(ReleaseRequest {
            owner: owner.to_string(),
            repo: Some(repo.to_string()),
            version: branch.to_string(),
            is_branch: Some(true),
            description: None,
            url: None,
        });
        let key = (
            owner.to_string(),
            repo.to_string(),
            branch.to_string(),
            true,
        );
        let resolved = ResolvedRelease {
            release,
            id: sha.to_string(),
            archive_url: branch_archive_url(owner, repo, branch),
        };
        self.resolved.insert(key, resolved).await;
    }

    /// Releases of a repo minus the hidden ones. Cached.
    pub async fn releases(&self, owner: &str, repo: &str) -> anyhow::Result<Vec<RemoteRelease>> {
        let key = (owner.to_string(), repo.to_string());
        if let Some(hit) = self.releases.get(&key).await {
            return Ok(hit);
        }
        let releases: Vec<RemoteRelease> = self
            .source
            .list_releases(owner, repo)
            .await?
            .into_iter()
            .filter(|r| !self.is_hidden(owner, &r.name))
            .collect();
        self.releases.insert(key, releases.clone()).await;
        Ok(releases)
    }

    fn is_hidden(&self, owner: &str, name: &str) -> bool {
        let slug = format!("{}/{}", owner, name);
        self.settings.hidden.iter().any(|h| *h == slug)
    }

    /// Every tagged release of the official owner's catalog repos, plus
    /// every catalog branch. Repos or branches that fail to resolve are
    /// logged and skipped.
    pub async fn list_all_releases(&self) -> Vec<ResolvedRelease> {
        let catalog = &self.settings.catalog;

        let tagged = catalog
            .repos
            .iter()
            .filter(|r| r.owner == catalog.official_owner)
            .map(|r| async move {
                match self.releases(&r.owner, &r.repo).await {
                    Ok(releases) => releases
                        .into_iter()
                        .map(|remote| ResolvedRelease {
                            release: catalog.complete(ReleaseRequest {
                                owner: r.owner.clone(),
                                repo: Some(r.repo.clone()),
                                version: remote.name.clone(),
                                is_branch: Some(false),
                                description: None,
                                url: None,
                            }),
                            id: remote.tag_name,
                            archive_url: remote.tarball_url,
                        })
                        .collect(),
                    Err(e) => {
                        tracing::warn!(owner = %r.owner, repo = %r.repo, error = %format!("{:#}", e), "Unable to fetch releases");
                        Vec::new()
                    }
                }
            });

        let branches = catalog.branch_releases().into_iter().map(|release| async move {
            match self.resolve(&release).await {
                Ok(resolved) => vec![resolved],
                Err(e) => {
                    tracing::warn!(owner = %release.owner, repo = %release.repo, branch = %release.version, error = %e, "Unable to fetch branch release");
                    Vec::new()
                }
            }
        });

        let (tagged, branches) = futures::join!(
            futures::future::join_all(tagged),
            futures::future::join_all(branches)
        );
        tagged
            .into_iter()
            .chain(branches)
            .flatten()
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source control used across the firmware tests.
    #[derive(Default)]
    pub struct FakeSource {
        pub releases: std::sync::Mutex<HashMap<(String, String), Vec<RemoteRelease>>>,
        pub heads: std::sync::Mutex<HashMap<(String, String, String), String>>,
        pub archives: std::sync::Mutex<HashMap<String, Bytes>>,
        pub head_calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn with_head(self, owner: &str, repo: &str, branch: &str, sha: &str) -> Self {
            self.set_head(owner, repo, branch, sha);
            self
        }

        pub fn set_head(&self, owner: &str, repo: &str, branch: &str, sha: &str) {
            self.heads.lock().unwrap().insert(
                (owner.into(), repo.into(), branch.into()),
                sha.into(),
            );
        }

        pub fn with_release(self, owner: &str, repo: &str, name: &str) -> Self {
            self.releases
                .lock()
                .unwrap()
                .entry((owner.into(), repo.into()))
                .or_default()
                .push(RemoteRelease {
                    name: name.into(),
                    tag_name: name.into(),
                    tarball_url: format!("https://api.github.com/repos/{}/{}/tarball/{}", owner, repo, name),
                });
            self
        }

        pub fn with_archive(self, url: &str, data: Vec<u8>) -> Self {
            self.archives
                .lock()
                .unwrap()
                .insert(url.to_string(), Bytes::from(data));
            self
        }
    }

    #[async_trait]
    impl SourceControl for FakeSource {
        async fn list_releases(&self, owner: &str, repo: &str) -> anyhow::Result<Vec<RemoteRelease>> {
            self.releases
                .lock()
                .unwrap()
                .get(&(owner.to_string(), repo.to_string()))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }

        async fn branch_head(&self, owner: &str, repo: &str, branch: &str) -> anyhow::Result<String> {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            self.heads
                .lock()
                .unwrap()
                .get(&(owner.to_string(), repo.to_string(), branch.to_string()))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }

        async fn fetch_archive(&self, url: &str) -> anyhow::Result<Bytes> {
            self.archives
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found: {}", url))
        }
    }

    fn resolver(source: FakeSource) -> (Arc<FakeSource>, ReleaseResolver) {
        let source = Arc::new(source);
        let resolver = ReleaseResolver::new(source.clone(), ResolverSettings::default());
        (source, resolver)
    }

    fn request(owner: &str, version: &str) -> ReleaseRequest {
        ReleaseRequest {
            owner: owner.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_branch_from_catalog() {
        let catalog = ReleaseCatalog::default();
        let release = catalog.complete(request("SlimeVR", "main"));
        assert_eq!(release.repo, "SlimeVR-Tracker-ESP");
        assert!(release.is_branch);
        assert_eq!(release.description.as_deref(), Some("Latest development build"));
        assert_eq!(
            release.url,
            "https://github.com/SlimeVR/SlimeVR-Tracker-ESP/tree/main"
        );
    }

    #[test]
    fn test_complete_tag_defaults() {
        let catalog = ReleaseCatalog::default();
        let release = catalog.complete(request("SlimeVR", "v0.4.0"));
        assert!(!release.is_branch);
        assert!(release.description.is_none());
        assert_eq!(
            release.url,
            "https://github.com/SlimeVR/SlimeVR-Tracker-ESP/releases/tag/v0.4.0"
        );
    }

    #[test]
    fn test_complete_keeps_caller_values() {
        let catalog = ReleaseCatalog::default();
        let release = catalog.complete(ReleaseRequest {
            owner: "someone".into(),
            repo: Some("fork".into()),
            version: "feature".into(),
            is_branch: Some(true),
            description: Some("mine".into()),
            url: Some("https://example.com".into()),
        });
        assert_eq!(release.repo, "fork");
        assert!(release.is_branch);
        assert_eq!(release.description.as_deref(), Some("mine"));
        assert_eq!(release.url, "https://example.com");
    }

    #[test]
    fn test_redirect_patched_release() {
        let (_, resolver) = resolver(FakeSource::default());
        let catalog = ReleaseCatalog::default();
        let redirected = resolver.redirect(catalog.complete(request("SlimeVR", "v0.3.3")));
        assert_eq!(redirected.owner, "ButterscotchV");
        assert_eq!(redirected.version, "v0.3.3-bno-patched");
        assert_eq!(redirected.repo, "SlimeVR-Tracker-ESP");

        let untouched = resolver.redirect(catalog.complete(request("SlimeVR", "v0.3.2")));
        assert_eq!(untouched.owner, "SlimeVR");
    }

    #[tokio::test]
    async fn test_resolve_branch_pins_head() {
        let (_, resolver) = resolver(
            FakeSource::default().with_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "abc123"),
        );
        let resolved = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "main", None)
            .await
            .unwrap();
        assert_eq!(resolved.id, "abc123");
        assert!(resolved.release.is_branch);
        assert_eq!(
            resolved.archive_url,
            "https://github.com/SlimeVR/SlimeVR-Tracker-ESP/archive/refs/heads/main.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let (source, resolver) = resolver(
            FakeSource::default().with_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "abc123"),
        );
        for _ in 0..3 {
            resolver
                .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "main", Some(true))
                .await
                .unwrap();
        }
        assert_eq!(source.head_calls.load(Ordering::SeqCst), 1);

        source.set_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "def456");
        let cached = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "main", Some(true))
            .await
            .unwrap();
        assert_eq!(cached.id, "abc123");
    }

    #[tokio::test]
    async fn test_resolve_tag() {
        let (_, resolver) = resolver(
            FakeSource::default().with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0"),
        );
        let resolved = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0", None)
            .await
            .unwrap();
        assert_eq!(resolved.id, "v0.4.0");
        assert!(!resolved.release.is_branch);
        assert!(resolved.archive_url.ends_with("/tarball/v0.4.0"));
    }

    #[tokio::test]
    async fn test_resolve_missing_release_is_not_found() {
        let (_, resolver) = resolver(
            FakeSource::default().with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0"),
        );
        let err = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "v9.9.9", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ReleaseNotFound { .. }));

        let err = resolver
            .resolve_version("Nobody", "nothing", "main", Some(true))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ReleaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_hidden_releases_are_excluded() {
        let (_, resolver) = resolver(
            FakeSource::default()
                .with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.2.1")
                .with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0"),
        );
        let err = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "v0.2.1", Some(false))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ReleaseNotFound { .. }));

        let names: Vec<String> = resolver
            .releases("SlimeVR", "SlimeVR-Tracker-ESP")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["v0.4.0"]);
    }

    #[tokio::test]
    async fn test_list_all_releases_skips_failures() {
        // Branch head for `main` is missing, so only the tag survives.
        let (_, resolver) = resolver(
            FakeSource::default().with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0"),
        );
        let all = resolver.list_all_releases().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].release.version, "v0.4.0");

        let (_, resolver) = resolver_with_branch();
        let all = resolver.list_all_releases().await;
        assert!(all.iter().any(|r| r.release.is_branch && r.id == "abc123"));
    }

    #[tokio::test]
    async fn test_observed_head_replaces_cached_commit() {
        let (source, resolver) = resolver(
            FakeSource::default().with_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "abc123"),
        );
        resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "main", Some(true))
            .await
            .unwrap();

        source.set_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "def456");
        resolver
            .observe_branch_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "def456")
            .await;
        let calls = source.head_calls.load(Ordering::SeqCst);
        let resolved = resolver
            .resolve_version("SlimeVR", "SlimeVR-Tracker-ESP", "main", None)
            .await
            .unwrap();
        assert_eq!(resolved.id, "def456");
        assert!(resolved.release.is_branch);
        assert_eq!(source.head_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_cache_insert_prunes_expired_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        cache.insert("c".into(), 3).await;
        let entries = cache.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("c"));
    }

    fn resolver_with_branch() -> (Arc<FakeSource>, ReleaseResolver) {
        resolver(
            FakeSource::default()
                .with_release("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0")
                .with_head("SlimeVR", "SlimeVR-Tracker-ESP", "main", "abc123"),
        )
    }
}
