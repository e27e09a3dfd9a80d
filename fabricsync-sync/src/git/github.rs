//! [`GitHost`] over the GitHub REST API (trees, contents and commits).

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::{header, Client as HttpClient, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{validate_repo_path, CommitInfo, GitError, GitHost, RemoteEntry, RemoteFile};

const DEFAULT_API: &str = "https://api.github.com";

/// GitHub-backed repository on a single branch.
#[derive(Clone)]
pub struct GitHubRepository {
    http_client: HttpClient,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    branch: String,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct CommitListItem {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitPerson>,
}

#[derive(Debug, Deserialize)]
struct CommitPerson {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WriteContent,
    commit: WriteCommit,
}

#[derive(Debug, Deserialize)]
struct WriteContent {
    path: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WriteCommit {
    sha: String,
    committer: Option<CommitPerson>,
}

impl GitHubRepository {
    pub fn new(owner: String, repo: String, branch: String, token: String) -> Result<Self, GitError> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("fabricsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GitError::Invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: DEFAULT_API.to_string(),
            token,
            owner,
            repo,
            branch,
        })
    }

    /// Point at a GitHub Enterprise API root instead of api.github.com.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.base_url, self.owner, self.repo, tail)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Response, GitError> {
        let mut request = self
            .http_client
            .request(method, url)
            .query(query)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                GitError::Transient(format!("request to {url} failed: {e}"))
            } else {
                GitError::Invalid(format!("request to {url} failed: {e}"))
            }
        })
    }

    /// Turn a non-success response into a [`GitError`].
    async fn error_for(&self, response: Response, path: &str) -> GitError {
        let status = response.status();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false);
        let message = match response.json::<GitHubErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };
        classify_status(status, rate_limited, path, message)
    }

    async fn current_sha(&self, path: &str) -> Result<Option<String>, GitError> {
        match self.read_file(path).await {
            Ok(file) => Ok(Some(file.hash)),
            Err(GitError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GitHost for GitHubRepository {
    fn describe(&self) -> String {
        format!("github:{}/{}@{}", self.owner, self.repo, self.branch)
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, GitError> {
        validate_repo_path(dir)?;
        let url = self.repo_url(&format!("git/trees/{}", self.branch));
        let response = self
            .request(Method::GET, &url, &[("recursive", "1")], None)
            .await?;
        if !response.status().is_success() {
            return Err(match self.error_for(response, dir).await {
                GitError::NotFound { .. } => GitError::Unreachable(format!(
                    "{} or its branch does not exist",
                    self.describe()
                )),
                other => other,
            });
        }
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| GitError::Transient(format!("malformed tree response: {e}")))?;
        if tree.truncated {
            warn!(repo = %self.describe(), "tree listing truncated by GitHub");
        }
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut entries: Vec<RemoteEntry> = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob" && e.path.starts_with(&prefix))
            .map(|e| RemoteEntry {
                path: e.path,
                hash: e.sha,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(dir, count = entries.len(), "listed GitHub directory");
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<RemoteFile, GitError> {
        validate_repo_path(path)?;
        let url = self.repo_url(&format!("contents/{path}"));
        let response = self
            .request(Method::GET, &url, &[("ref", self.branch.as_str())], None)
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, path).await);
        }
        let body: ContentResponse = response
            .json()
            .await
            .map_err(|e| GitError::Transient(format!("malformed contents response: {e}")))?;
        if body.encoding != "base64" {
            return Err(GitError::Invalid(format!(
                "{path}: unsupported content encoding '{}'",
                body.encoding
            )));
        }
        Ok(RemoteFile {
            path: body.path,
            content: decode_content(&body.content)?,
            hash: body.sha,
        })
    }

    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, GitError> {
        validate_repo_path(path)?;
        let url = self.repo_url("commits");
        let response = self
            .request(
                Method::GET,
                &url,
                &[("path", path), ("sha", self.branch.as_str()), ("per_page", "1")],
                None,
            )
            .await?;
        if !response.status().is_success() {
            return match self.error_for(response, path).await {
                GitError::NotFound { .. } => Ok(None),
                other => Err(other),
            };
        }
        let commits: Vec<CommitListItem> = response
            .json()
            .await
            .map_err(|e| GitError::Transient(format!("malformed commits response: {e}")))?;
        Ok(commits
            .into_iter()
            .next()
            .and_then(|c| c.commit.committer)
            .map(|p| p.date))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<CommitInfo, GitError> {
        validate_repo_path(path)?;
        let url = self.repo_url(&format!("contents/{path}"));
        let mut body = serde_json::json!({
            "message": message,
            "content": STANDARD.encode(content.replace("\r\n", "\n")),
            "branch": self.branch,
        });
        if let Some(sha) = expected_hash {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }
        let response = self.request(Method::PUT, &url, &[], Some(body)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, path).await);
        }
        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| GitError::Transient(format!("malformed write response: {e}")))?;
        Ok(CommitInfo {
            path: written.content.path,
            hash: written.content.sha,
            commit: written.commit.sha,
            committed_at: written
                .commit
                .committer
                .map(|p| p.date)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), GitError> {
        validate_repo_path(path)?;
        let sha = match expected_hash {
            Some(sha) => sha.to_string(),
            None => self
                .current_sha(path)
                .await?
                .ok_or_else(|| GitError::NotFound {
                    path: path.to_string(),
                })?,
        };
        let url = self.repo_url(&format!("contents/{path}"));
        let body = serde_json::json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
        });
        let response = self.request(Method::DELETE, &url, &[], Some(body)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, path).await);
        }
        Ok(())
    }
}

/// Map an HTTP status to the [`GitError`] taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    rate_limited: bool,
    path: &str,
    message: String,
) -> GitError {
    match status.as_u16() {
        401 => GitError::Auth(message),
        429 => GitError::Transient(format!("rate limited: {message}")),
        403 if rate_limited => GitError::Transient(format!("rate limited: {message}")),
        403 => GitError::Auth(message),
        404 => GitError::NotFound {
            path: path.to_string(),
        },
        // GitHub answers a mismatched or missing `sha` with 409 or 422.
        409 | 422 => GitError::Stale {
            path: path.to_string(),
        },
        500..=599 => GitError::Transient(format!("{status}: {message}")),
        _ => GitError::Invalid(format!("{status}: {message}")),
    }
}

/// Decode the base64 `content` field, which GitHub wraps at 60 columns.
pub(crate) fn decode_content(encoded: &str) -> Result<String, GitError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| GitError::Invalid(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GitError::Invalid(format!("file is not UTF-8: {e}")))
}
