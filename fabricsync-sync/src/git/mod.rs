//! Git host interface.
//!
//! The sync core only needs four capabilities from a repository: list a
//! directory, read a file with its hash, read a file's last-modified time and
//! commit a file. [`GitHost`] captures exactly that; [`connect`] picks the
//! implementation configured for a fabric.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fabricsync_core::types::{RepositoryConfig, RepositorySource};

pub mod github;
pub mod local;

pub use github::GitHubRepository;
pub use local::LocalRepository;

/// Failures talking to a Git host.
#[derive(Debug, Error)]
pub enum GitError {
    /// Network failure, 5xx or rate limiting. Retried with backoff.
    #[error("transient repository error: {0}")]
    Transient(String),

    /// Credentials missing or rejected. Aborts the operation.
    #[error("repository authentication failed: {0}")]
    Auth(String),

    /// The repository itself cannot be reached. Aborts the operation.
    #[error("repository unreachable: {0}")]
    Unreachable(String),

    #[error("{path} not found in repository")]
    NotFound { path: String },

    /// The file no longer has the hash the write was based on.
    #[error("{path} changed in the repository since it was last synced")]
    Stale { path: String },

    #[error("invalid repository request: {0}")]
    Invalid(String),

    /// Transient failures outlasted the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<GitError>,
    },
}

impl GitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::Transient(_))
    }

    /// Errors that compromise a whole operation rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GitError::Auth(_) | GitError::Unreachable(_) | GitError::Exhausted { .. }
        )
    }
}

/// One file in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Repository-relative path with `/` separators.
    pub path: String,
    /// Host-native content hash (compare only against the same host).
    pub hash: String,
}

/// A file read from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub hash: String,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub path: String,
    /// Hash of the file as now stored.
    pub hash: String,
    pub commit: String,
    /// Time the host recorded the change; later `last_modified` calls return it.
    pub committed_at: DateTime<Utc>,
}

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    /// Every file below `dir`, recursively. A missing directory is empty.
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, GitError>;

    async fn read_file(&self, path: &str) -> Result<RemoteFile, GitError>;

    /// Last modification time of `path`, `None` if the file does not exist.
    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, GitError>;

    /// Commit `content` to `path`.
    ///
    /// `expected_hash` is the hash the caller last saw: `Some` requires the
    /// current file to have it, `None` requires the file to be absent (or
    /// already identical). A mismatch is [`GitError::Stale`].
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<CommitInfo, GitError>;

    /// Delete `path`. Same precondition rules as `write_file`.
    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), GitError>;
}

/// Build the [`GitHost`] a fabric's repository config points at.
pub fn connect(config: &RepositoryConfig) -> Result<Arc<dyn GitHost>, GitError> {
    match &config.source {
        RepositorySource::Local { path } => Ok(Arc::new(LocalRepository::new(path.clone()))),
        RepositorySource::GitHub {
            owner,
            repo,
            branch,
            token_env,
        } => {
            let token = std::env::var(token_env).map_err(|_| {
                GitError::Auth(format!("environment variable {token_env} is not set"))
            })?;
            Ok(Arc::new(GitHubRepository::new(
                owner.clone(),
                repo.clone(),
                branch.clone(),
                token,
            )?))
        }
    }
}

/// Reject absolute paths and `..` segments before they reach a host.
pub(crate) fn validate_repo_path(path: &str) -> Result<(), GitError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(GitError::Invalid(format!("unsafe repository path '{path}'")));
    }
    Ok(())
}
