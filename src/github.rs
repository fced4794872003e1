use crate::config::Config;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Cap on the number of tree paths carried into a prompt
pub const MAX_TREE_ENTRIES: usize = 50;
const API_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("trust-layer/", env!("CARGO_PKG_VERSION"));

static REPO_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"github\.com/([^/]+)/([^/]+)(?:/|$)").expect("valid regex"));

/// Bounded README + file-path summary of a repository
///
/// Recomputed on every request; never cached.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    /// Repository owner or organization
    pub owner: String,
    /// Repository name, `.git` suffix stripped
    pub repo: String,
    /// Raw README text, empty when none could be fetched
    pub readme: String,
    /// Up to [`MAX_TREE_ENTRIES`] blob paths in API order
    pub files: Vec<String>,
}

/// Fetches README and file listings from the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubFetcher {
    /// Creates a fetcher against the configured API base URL
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.github_base_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
        })
    }

    /// Retrieves a bounded snapshot of the repository behind `url`.
    ///
    /// Best-effort by contract: an unrecognizable URL or an unreachable API
    /// yields `None` (logged), a missing README or tree degrades to an empty
    /// field. Callers continue with whatever they get.
    pub async fn fetch_repo_contents(&self, url: &str) -> Option<RepoSnapshot> {
        let (owner, repo) = match parse_repo_url(url) {
            Some(parsed) => parsed,
            None => {
                warn!(%url, "invalid GitHub URL, skipping repository context");
                return None;
            }
        };

        let readme = match self.fetch_readme(&owner, &repo).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%owner, %repo, error = %e, "GitHub README fetch failed");
                return None;
            }
        };

        let files = match self.fetch_tree_paths(&owner, &repo).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(%owner, %repo, error = %e, "GitHub tree fetch failed");
                return None;
            }
        };

        Some(RepoSnapshot {
            owner,
            repo,
            readme,
            files,
        })
    }

    async fn fetch_readme(&self, owner: &str, repo: &str) -> Result<String> {
        let url = format!("{}/repos/{owner}/{repo}/contents/README.md", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3.raw");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            warn!(%owner, %repo, status = response.status().as_u16(), "no README.md found");
            Ok(String::new())
        }
    }

    /// First [`MAX_TREE_ENTRIES`] blob paths of the `main` tree, in API order.
    /// Paths only; blob contents are never fetched here.
    async fn fetch_tree_paths(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/repos/{owner}/{repo}/git/trees/main?recursive=1",
            self.base_url
        );
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            warn!(%owner, %repo, status = response.status().as_u16(), "repository tree unavailable");
            return Ok(Vec::new());
        }

        let tree: TreeResponse = response.json().await?;
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .take(MAX_TREE_ENTRIES)
            .map(|entry| entry.path)
            .collect())
    }
}

/// Extracts `(owner, repo)` out of a `github.com/<owner>/<repo>` URL,
/// stripping a trailing `.git` from the repository name
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let captures = REPO_URL.captures(url)?;
    let owner = captures.get(1)?.as_str().to_string();
    let repo = captures.get(2)?.as_str();
    let repo = repo.strip_suffix(".git").unwrap_or(repo).to_string();
    Some((owner, repo))
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}
