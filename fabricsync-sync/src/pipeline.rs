//! Shared sync pipeline entrypoint used by CLI and daemon.

use std::path::Path;

use futures::future::join_all;
use tracing::warn;

use fabricsync_core::store;
use fabricsync_core::types::{FabricName, SyncDirection};

use crate::cancel::CancellationFlag;
use crate::orchestrator::Orchestrator;
use crate::report::SyncReport;
use crate::SyncError;

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every registered fabric, concurrently.
    All,
    /// A single named fabric.
    Fabric(FabricName),
}

/// Outcome for one fabric. Failures of one fabric never stop the others.
#[derive(Debug)]
pub struct FabricRun {
    pub fabric: FabricName,
    pub outcome: Result<SyncReport, SyncError>,
}

/// Run a sync for every fabric in `scope`.
///
/// `direction` overrides each fabric's `default_direction`. `source` labels
/// the operation (`cli`, `scheduler`, `watcher`, `socket`).
pub async fn run(
    home: &Path,
    scope: SyncScope,
    direction: Option<SyncDirection>,
    source: &str,
    cancel: &CancellationFlag,
) -> Result<Vec<FabricRun>, SyncError> {
    let names = match scope {
        SyncScope::All => store::list_fabrics_at(home)?
            .into_iter()
            .map(|f| f.name)
            .collect(),
        SyncScope::Fabric(name) => {
            store::load_fabric_at(home, &name)?;
            vec![name]
        }
    };

    let runs = names.into_iter().map(|name| async move {
        let outcome = run_one(home, &name, direction, source, cancel).await;
        if let Err(err) = &outcome {
            warn!(fabric = %name, error = %err, "fabric sync did not complete");
        }
        FabricRun {
            fabric: name,
            outcome,
        }
    });
    Ok(join_all(runs).await)
}

async fn run_one(
    home: &Path,
    name: &FabricName,
    direction: Option<SyncDirection>,
    source: &str,
    cancel: &CancellationFlag,
) -> Result<SyncReport, SyncError> {
    let orchestrator = Orchestrator::open(home, name)?
        .with_source(source)
        .with_cancellation(cancel.clone());
    let direction = direction.unwrap_or(orchestrator.fabric().default_direction);
    orchestrator.trigger_sync(direction).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricsync_core::types::{RepositoryConfig, RepositorySource};
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_all_empty_store_returns_empty_vec() {
        let home = TempDir::new().unwrap();
        let result = run(home.path(), SyncScope::All, None, "test", &CancellationFlag::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn unknown_fabric_is_an_error() {
        let home = TempDir::new().unwrap();
        let result = run(
            home.path(),
            SyncScope::Fabric(FabricName::from("nope")),
            None,
            "test",
            &CancellationFlag::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_all_covers_every_fabric() {
        let home = TempDir::new().unwrap();
        for name in ["east", "west"] {
            let repo = home.path().join(format!("repo-{name}"));
            std::fs::create_dir_all(&repo).unwrap();
            store::init_fabric_at(
                home.path(),
                FabricName::from(name),
                RepositoryConfig::new(RepositorySource::Local { path: repo }),
                None,
                SyncDirection::Bidirectional,
            )
            .unwrap();
        }
        let runs = run(home.path(), SyncScope::All, None, "test", &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.outcome.is_ok()));
    }
}
