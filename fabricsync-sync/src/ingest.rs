//! Raw ingestion: hand-written manifests under `raw_dir` are rewritten into
//! the managed tree, one file per resource, and the raw file is removed.
//!
//! A raw file is only deleted once every manifest in it has been committed.
//! Files that fail to parse are reported and left where they are.

use std::path::Path;

use tracing::{info, warn};

use fabricsync_core::types::{Manifest, OperationId};
use fabricsync_detector::{is_manifest_file, parse_documents};
use fabricsync_renderer::{CommitAction, TemplateContext};

use crate::error::SyncError;
use crate::git::{GitError, RemoteEntry};
use crate::orchestrator::Orchestrator;
use crate::report::{IngestedFile, SyncReport};
use crate::retry::with_retry;

impl Orchestrator {
    pub(crate) async fn ingest_raw(
        &self,
        op_id: &OperationId,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let raw_dir = self.fabric().repository.raw_dir.as_str();
        let listing = with_retry(self.retry(), "list raw directory", || {
            self.host().list_dir(raw_dir)
        })
        .await?;

        for entry in listing {
            if self.checkpoint(report) {
                return Ok(());
            }
            if !is_manifest_file(Path::new(&entry.path)) {
                continue;
            }
            match self.ingest_file(&entry, op_id).await {
                Ok(Some(ingested)) => report.ingested.push(ingested),
                Ok(None) => {}
                Err(IngestFailure::Fatal(err)) => return Err(err),
                Err(IngestFailure::File(reason)) => {
                    warn!(fabric = %self.fabric().name, path = %entry.path, error = %reason, "raw file not ingested");
                    report.fail(entry.path.clone(), reason);
                }
            }
        }
        Ok(())
    }

    async fn ingest_file(
        &self,
        entry: &RemoteEntry,
        op_id: &OperationId,
    ) -> Result<Option<IngestedFile>, IngestFailure> {
        let file = match with_retry(self.retry(), "read raw file", || {
            self.host().read_file(&entry.path)
        })
        .await
        {
            Ok(file) => file,
            Err(GitError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(IngestFailure::git(err)),
        };
        let manifests = parse_documents(Path::new(&file.path), &file.content)
            .map_err(|e| IngestFailure::File(e.to_string()))?;

        let mut managed_paths = Vec::with_capacity(manifests.len());
        for manifest in &manifests {
            managed_paths.push(self.commit_manifest(manifest, &entry.path, op_id).await?);
        }

        let message = format!("Ingest {}\n\nmoved into {}\n", entry.path, managed_paths.join(", "));
        match with_retry(self.retry(), "delete raw file", || {
            self.host().delete_file(&entry.path, &message, Some(&file.hash))
        })
        .await
        {
            Ok(()) | Err(GitError::NotFound { .. }) => {}
            Err(err) => return Err(IngestFailure::git(err)),
        }
        info!(fabric = %self.fabric().name, raw = %entry.path, resources = managed_paths.len(), "raw file ingested");
        Ok(Some(IngestedFile {
            raw_path: entry.path.clone(),
            managed_paths,
        }))
    }

    /// Write one manifest to its managed path, replacing whatever is there.
    async fn commit_manifest(
        &self,
        manifest: &Manifest,
        raw_path: &str,
        op_id: &OperationId,
    ) -> Result<String, IngestFailure> {
        let fabric = &self.fabric().name;
        let managed_dir = self.fabric().repository.managed_dir.as_str();
        let ctx = TemplateContext::for_manifest(fabric, manifest, managed_dir);
        let path = self.renderer().managed_path(&ctx).map_err(IngestFailure::file)?;
        let content = self
            .renderer()
            .render_manifest(fabric, manifest, managed_dir)
            .map_err(IngestFailure::file)?;
        let message = self
            .renderer()
            .commit_message(&ctx.with_action(CommitAction::Ingest).with_operation(op_id))
            .map_err(IngestFailure::file)?;

        let current = match with_retry(self.retry(), "read managed file", || {
            self.host().read_file(&path)
        })
        .await
        {
            Ok(existing) => Some(existing.hash),
            Err(GitError::NotFound { .. }) => None,
            Err(err) => return Err(IngestFailure::git(err)),
        };
        with_retry(self.retry(), "commit managed file", || {
            self.host()
                .write_file(&path, &content, &message, current.as_deref())
        })
        .await
        .map_err(|err| match err {
            GitError::Stale { .. } => IngestFailure::File(format!(
                "{path} changed while ingesting {raw_path}; will retry on the next sync"
            )),
            other => IngestFailure::git(other),
        })?;
        Ok(path)
    }
}

/// Ingestion errors split by blast radius.
enum IngestFailure {
    /// Compromises the whole operation.
    Fatal(SyncError),
    /// Confined to one raw file.
    File(String),
}

impl IngestFailure {
    fn git(err: GitError) -> Self {
        if err.is_fatal() {
            IngestFailure::Fatal(err.into())
        } else {
            IngestFailure::File(err.to_string())
        }
    }

    fn file(err: impl ToString) -> Self {
        IngestFailure::File(err.to_string())
    }
}
