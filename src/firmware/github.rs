use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;

use super::release::{RemoteRelease, SourceControl};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "firmware-forge";

/// Token prefixes sent as `Bearer` credentials.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const BEARER_PREFIXES: &[&str] = &["ghp_", "github_pat_"];

/// `Authorization` header value for a configured credential. Personal access
/// tokens go out as `Bearer`; anything else (typically `user:token`) as
/// `Basic`.
pub fn authorization_header(credential: &str) -> Option<String> {
    let credential = credential.trim();
    if credential.is_empty() {
        return None;
    }
    if BEARER_PREFIXES.iter().any(|p| credential.starts_with(p)) {
        Some(format!("Bearer {}", credential))
    } else {
        Some(format!("Basic {}", STANDARD.encode(credential)))
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    name: Option<String>,
    tag_name: String,
    tarball_url: Option<String>,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    commit: GitHubCommit,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
}

/// GitHub REST client for releases, branches and source archives.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    auth: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: &str, credential: Option<&str>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth: credential.and_then(authorization_header),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.auth {
            Some(auth) => req.header("Authorization", auth),
            None => req,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{}", self.api_url, path);
        self.get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?
            .error_for_status()
            .with_context(|| format!("GitHub returned error status for {}", url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn list_releases(&self, owner: &str, repo: &str) -> anyhow::Result<Vec<RemoteRelease>> {
        let releases: Vec<GitHubRelease> = self
            .get_json(&format!("/repos/{}/{}/releases?per_page=100", owner, repo))
            .await?;
        Ok(releases
            .into_iter()
            .filter(|r| !r.draft)
            .map(|r| RemoteRelease {
                tarball_url: r.tarball_url.unwrap_or_else(|| {
                    format!(
                        "https://github.com/{}/{}/archive/refs/tags/{}.tar.gz",
                        owner, repo, r.tag_name
                    )
                }),
                name: r
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| r.tag_name.clone()),
                tag_name: r.tag_name,
            })
            .collect())
    }

    async fn branch_head(&self, owner: &str, repo: &str, branch: &str) -> anyhow::Result<String> {
        let branch: GitHubBranch = self
            .get_json(&format!("/repos/{}/{}/branches/{}", owner, repo, branch))
            .await?;
        Ok(branch.commit.sha)
    }

    async fn fetch_archive(&self, url: &str) -> anyhow::Result<Bytes> {
        let resp = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?
            .error_for_status()
            .with_context(|| format!("Download of {} returned error status", url))?;
        resp.bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))
    }
}
