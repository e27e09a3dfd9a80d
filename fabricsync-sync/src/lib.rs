//! # fabricsync-sync
//!
//! The sync core: keeps a fabric's resources consistent between the Git
//! repository (`desired_spec`), GUI edits (`draft_spec`) and the live cluster
//! (`actual_spec`).
//!
//! Start with [`Orchestrator`] for a single fabric, or [`pipeline::run`] for
//! a scope of fabrics.

pub mod cancel;
pub mod cluster;
pub mod conflict;
pub mod diff;
pub mod drift;
pub mod error;
pub mod git;
pub mod hash_store;
mod ingest;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod status;

pub use cancel::CancellationFlag;
pub use cluster::{ClusterError, ClusterReader, SnapshotCluster, StaticCluster};
pub use conflict::detect_conflict;
pub use drift::{detect_drift, DriftReport, DriftStatus, FieldChange, FieldDiff};
pub use error::SyncError;
pub use git::{GitError, GitHost, GitHubRepository, LocalRepository};
pub use orchestrator::{DeleteReport, ObserveReport, Orchestrator, ResolutionPolicy};
pub use report::SyncReport;
pub use retry::RetryPolicy;
