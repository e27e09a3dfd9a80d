//! Daemon runtime: scheduler + repository watcher + cluster poller + socket server.

pub mod cluster;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use cluster::{observe_fabric, reader_for, KubeCluster};
pub use error::DaemonError;
pub use protocol::{
    request_resolve, request_status, request_stop, request_sync, send_request, DaemonRequest,
    DaemonResponse, PolicyRequest,
};
pub use runtime::{run, start_blocking, FabricOutcome, SyncSummary};
