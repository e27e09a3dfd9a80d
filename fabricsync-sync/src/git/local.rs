//! [`GitHost`] over a working tree on the local filesystem.
//!
//! Writes are atomic (`.tmp` + rename) and count as commits; a file's
//! modification time is its last-modified timestamp.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{validate_repo_path, CommitInfo, GitError, GitHost, RemoteEntry, RemoteFile};
use crate::hash_store::content_hash;

#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, GitError> {
        validate_repo_path(path)?;
        Ok(self.root.join(path))
    }

    fn ensure_root(&self) -> Result<(), GitError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(GitError::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn current_hash(&self, full: &Path) -> Result<Option<String>, GitError> {
        match std::fs::read_to_string(full) {
            Ok(content) => Ok(Some(content_hash(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_to_git(full, e)),
        }
    }

    fn check_precondition(
        &self,
        path: &str,
        current: Option<&str>,
        expected: Option<&str>,
        new_hash: Option<&str>,
    ) -> Result<(), GitError> {
        let ok = match (current, expected) {
            (None, None) => true,
            (Some(cur), Some(exp)) => cur == exp,
            (Some(cur), None) => Some(cur) == new_hash,
            (None, Some(_)) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(GitError::Stale {
                path: path.to_string(),
            })
        }
    }
}

#[async_trait]
impl GitHost for LocalRepository {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, GitError> {
        self.ensure_root()?;
        let base = self.resolve(dir)?;
        if !base.exists() {
            return Ok(vec![]);
        }
        let mut files = Vec::new();
        collect_files(&base, &mut files)?;

        let mut entries = Vec::with_capacity(files.len());
        for full in files {
            let Ok(rel) = full.strip_prefix(&self.root) else {
                continue;
            };
            let path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read_to_string(&full).map_err(|e| io_to_git(&full, e))?;
            entries.push(RemoteEntry {
                path,
                hash: content_hash(&content),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<RemoteFile, GitError> {
        self.ensure_root()?;
        let full = self.resolve(path)?;
        let content = match std::fs::read_to_string(&full) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GitError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(io_to_git(&full, e)),
        };
        Ok(RemoteFile {
            path: path.to_string(),
            hash: content_hash(&content),
            content,
        })
    }

    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, GitError> {
        self.ensure_root()?;
        let full = self.resolve(path)?;
        match std::fs::metadata(&full) {
            Ok(meta) => {
                let modified = meta.modified().map_err(|e| io_to_git(&full, e))?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_to_git(&full, e)),
        }
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<CommitInfo, GitError> {
        self.ensure_root()?;
        let full = self.resolve(path)?;
        let content = content.replace("\r\n", "\n");
        let new_hash = content_hash(&content);
        let current = self.current_hash(&full)?;
        self.check_precondition(path, current.as_deref(), expected_hash, Some(&new_hash))?;

        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_to_git(parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.fabricsync.tmp", full.display()));
        std::fs::write(&tmp, &content).map_err(|e| io_to_git(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &full) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_to_git(&full, e));
        }

        let committed_at = match self.last_modified(path).await? {
            Some(at) => at,
            None => Utc::now(),
        };
        let subject = message.lines().next().unwrap_or_default();
        tracing::debug!(path, subject, "committed to local repository");
        Ok(CommitInfo {
            path: path.to_string(),
            commit: new_hash.chars().take(12).collect(),
            hash: new_hash,
            committed_at,
        })
    }

    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), GitError> {
        self.ensure_root()?;
        let full = self.resolve(path)?;
        let Some(current) = self.current_hash(&full)? else {
            return Err(GitError::NotFound {
                path: path.to_string(),
            });
        };
        if let Some(expected) = expected_hash {
            if expected != current {
                return Err(GitError::Stale {
                    path: path.to_string(),
                });
            }
        }
        std::fs::remove_file(&full).map_err(|e| io_to_git(&full, e))?;
        let subject = message.lines().next().unwrap_or_default();
        tracing::debug!(path, subject, "deleted from local repository");
        Ok(())
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), GitError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_to_git(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_to_git(dir, e))?;
        let path = entry.path();
        let ty = entry.file_type().map_err(|e| io_to_git(&path, e))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if ty.is_dir() {
            collect_files(&path, out)?;
        } else if ty.is_file() && !path.to_string_lossy().ends_with(".fabricsync.tmp") {
            out.push(path);
        }
    }
    Ok(())
}

fn io_to_git(path: &Path, err: std::io::Error) -> GitError {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            GitError::Auth(format!("permission denied at {}", path.display()))
        }
        _ => GitError::Transient(format!("{}: {err}", path.display())),
    }
}
