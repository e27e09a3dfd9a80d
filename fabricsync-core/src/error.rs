//! Error types for fabricsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store and config operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load. Includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.fabricsync/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No fabric record exists under the given name.
    #[error("fabric '{fabric}' not found at {path}")]
    FabricNotFound { fabric: String, path: PathBuf },

    /// A fabric with this name is already registered.
    #[error("fabric '{fabric}' already exists")]
    FabricExists { fabric: String },

    /// No resource row exists for the given identity.
    #[error("resource {key} not found in fabric '{fabric}'")]
    ResourceNotFound { fabric: String, key: String },

    /// Optimistic concurrency check failed on save.
    #[error("resource {key} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// The per-fabric sync lock is held by another operation.
    #[error("sync already in progress for fabric '{fabric}' (held by {holder})")]
    LockHeld { fabric: String, holder: String },

    /// A name that would escape the store layout (path separators, `..`).
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
