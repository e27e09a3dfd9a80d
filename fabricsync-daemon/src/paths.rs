use std::path::{Path, PathBuf};

use fabricsync_core::store::root_at;

pub const DAEMON_LABEL: &str = "dev.fabricsync.daemon";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    root_at(home).join(DAEMON_SOCKET)
}

pub fn run_dir(home: &Path) -> PathBuf {
    root_at(home).join("run")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    root_at(home).join("logs")
}

/// Parent of every `fabrics/<name>/fabric.yaml`.
pub fn fabrics_root(home: &Path) -> PathBuf {
    root_at(home).join("fabrics")
}
