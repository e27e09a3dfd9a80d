//! fabricsync core library: domain types, file-backed store, configuration.
//!
//! - [`types`]: newtypes, the three-state [`Resource`], fabrics and operations
//! - [`store`]: load / save / lock under `~/.fabricsync/`
//! - [`config`]: [`SyncConfig`] from `~/.fabricsync/config.yaml`
//! - [`error`]: [`StoreError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::SyncConfig;
pub use error::StoreError;
pub use types::{
    ClusterConfig, ConflictStatus, DesiredUpdate, Fabric, FabricName, Manifest, ManifestMetadata,
    OperationId, OperationState, OperationSummary, RepositoryConfig, RepositorySource, Resource,
    ResourceKey, SpecDocument, SyncDirection, SyncOperation, DEFAULT_NAMESPACE,
};
