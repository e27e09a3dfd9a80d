//! Error types for fabricsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use fabricsync_core::error::StoreError;
use fabricsync_core::types::SyncDirection;
use fabricsync_detector::DetectError;
use fabricsync_renderer::RenderError;

use crate::cluster::ClusterError;
use crate::git::GitError;
use crate::report::SyncReport;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An error talking to the Git host.
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// An error reading live cluster state.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// A manifest could not be parsed.
    #[error("manifest error: {0}")]
    Parse(#[from] DetectError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (hash store).
    #[error("hash store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error (spec documents).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Another operation holds the fabric's sync lock. Never retried.
    #[error("sync already in progress for fabric '{fabric}' (held by {holder})")]
    LockContention { fabric: String, holder: String },

    /// The operation was aborted; `partial` records what had completed.
    #[error("sync of fabric '{fabric}' aborted: {reason}")]
    Aborted {
        fabric: String,
        reason: String,
        partial: Box<SyncReport>,
    },

    /// `resolve_conflict` on a resource that has no detected conflict.
    #[error("resource {key} has no conflict to resolve")]
    NotConflicted { key: String },

    /// `PreferGui` resolution on a resource whose draft is gone.
    #[error("resource {key} has no draft to keep")]
    NoDraft { key: String },

    /// The resource does not take part in the requested direction.
    #[error("resource {key} does not sync {direction}")]
    DirectionDisabled {
        key: String,
        direction: SyncDirection,
    },

    /// `create_resource` for an identity that already exists.
    #[error("resource {key} already exists")]
    ResourceExists { key: String },
}

impl SyncError {
    /// `true` for lock contention, however it is nested.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            SyncError::LockContention { .. } | SyncError::Store(StoreError::LockHeld { .. })
        )
    }

    /// Partial report of an aborted operation.
    pub fn partial_report(&self) -> Option<&SyncReport> {
        match self {
            SyncError::Aborted { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
