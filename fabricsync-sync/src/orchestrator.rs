//! Bidirectional Sync Orchestrator.
//!
//! Owns the lifecycle of a [`SyncOperation`] for one fabric:
//!
//! 1. Acquire the fabric lock (contention fails fast).
//! 2. `pending → running`, persisted.
//! 3. GitHub→GUI, GUI→GitHub, or both in that order.
//! 4. `running → succeeded | conflict_detected | cancelled | failed`, persisted.
//! 5. Release the lock, whatever happened in 3.
//!
//! Every spec-field write goes through the [`Resource`] transitions and an
//! optimistic store save.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use fabricsync_core::config::{load_config_at, LockConfig};
use fabricsync_core::error::StoreError;
use fabricsync_core::store;
use fabricsync_core::types::{
    DesiredUpdate, Fabric, FabricName, Manifest, ManifestMetadata, OperationId, Resource,
    ResourceKey, SpecDocument, SyncDirection, SyncOperation, DEFAULT_NAMESPACE,
};
use fabricsync_detector::{is_manifest_file, parse_documents};
use fabricsync_renderer::{CommitAction, Renderer, TemplateContext};
use serde::Serialize;

use crate::cancel::CancellationFlag;
use crate::cluster::{ClusterError, ClusterReader};
use crate::conflict::detect_conflict;
use crate::drift::resource_drift;
use crate::error::SyncError;
use crate::git::{self, CommitInfo, GitError, GitHost};
use crate::hash_store::{self, HashStore, HashStoreFile};
use crate::lock::FabricLock;
use crate::report::{
    ConflictItem, DriftEntry, ItemFailure, SkipReason, SkippedItem, SyncReport,
};
use crate::retry::{with_retry, RetryPolicy};

/// Reload-and-retry budget for a row save that lost an optimistic race.
const MAX_ROW_RETRIES: usize = 3;

/// How an operator resolves a detected conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionPolicy {
    /// Discard the draft and adopt the current Git content.
    PreferGit,
    /// Keep the draft; the next push overwrites Git.
    PreferGui,
    /// Replace the draft with an operator-merged document.
    Merge(SpecDocument),
}

/// Result of one cluster observation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObserveReport {
    pub fabric: FabricName,
    pub observed: usize,
    /// Resources whose `actual_spec` changed.
    pub changed: Vec<ResourceKey>,
    pub drift: Vec<DriftEntry>,
    pub failed: Vec<ItemFailure>,
    pub cancelled: bool,
}

/// Result of deleting a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub fabric: FabricName,
    pub resources: usize,
    pub removed_files: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

/// One managed file that parsed cleanly in the read phase of a pull.
struct PulledFile {
    path: String,
    hash: String,
    manifest: Manifest,
}

pub struct Orchestrator {
    home: PathBuf,
    fabric: Fabric,
    host: Arc<dyn GitHost>,
    renderer: Renderer,
    retry: RetryPolicy,
    cancel: CancellationFlag,
    source: String,
    stale_lock_after: Option<Duration>,
}

impl Orchestrator {
    /// Load `fabric` from the store and connect to its repository.
    pub fn open(home: &Path, fabric: &FabricName) -> Result<Self, SyncError> {
        let record = store::load_fabric_at(home, fabric)?;
        let config = load_config_at(home)?;
        let host = git::connect(&record.repository)?;
        Ok(Self::with_host(home, record, host)?
            .with_retry(RetryPolicy::from(&config.retry))
            .with_stale_lock_after(config.lock.stale_after()))
    }

    /// Build against an explicit [`GitHost`].
    pub fn with_host(home: &Path, fabric: Fabric, host: Arc<dyn GitHost>) -> Result<Self, SyncError> {
        Ok(Self {
            home: home.to_path_buf(),
            fabric,
            host,
            renderer: Renderer::for_home(home)?,
            retry: RetryPolicy::default(),
            cancel: CancellationFlag::new(),
            source: "cli".to_string(),
            stale_lock_after: LockConfig::default().stale_after(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Age after which a leftover fabric lock is broken; `None` never breaks it.
    #[must_use]
    pub fn with_stale_lock_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_lock_after = stale_after;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Trigger label recorded on operations and the lock (`cli`, `scheduler`, ...).
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    // -----------------------------------------------------------------------
    // Sync operations
    // -----------------------------------------------------------------------

    /// Pull the managed tree into `desired_spec`.
    pub async fn sync_github_to_gui(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::GithubToGui).await
    }

    /// Commit pending drafts to the repository.
    pub async fn sync_gui_to_github(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::GuiToGithub).await
    }

    /// Pull, then push, then refresh drift for every resource.
    pub async fn sync_bidirectional(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::Bidirectional).await
    }

    pub async fn trigger_sync(&self, direction: SyncDirection) -> Result<SyncReport, SyncError> {
        self.run(direction).await
    }

    async fn run(&self, direction: SyncDirection) -> Result<SyncReport, SyncError> {
        let name = self.fabric.name.clone();
        let mut op = SyncOperation::pending(name.clone(), direction, self.source.clone());
        let lock = self.lock(&op.id, &self.source)?;

        op.start();
        store::save_operation_at(&self.home, &op)?;
        info!(fabric = %name, operation_id = %op.id, %direction, source = %self.source, "sync started");

        let mut report = SyncReport::new(op.id.clone(), name.clone(), direction);
        let outcome = self.execute(direction, &op.id, &mut report).await;
        let summary = report.summary();

        let result = match outcome {
            Ok(()) if report.cancelled => {
                op.cancel(summary);
                info!(fabric = %name, operation_id = %op.id, synced = summary.synced, "sync cancelled");
                Ok(report)
            }
            Ok(()) => {
                op.finish(summary);
                info!(
                    fabric = %name,
                    operation_id = %op.id,
                    state = %op.state,
                    synced = summary.synced,
                    unchanged = summary.unchanged,
                    skipped_conflict = summary.skipped_conflict,
                    failed = summary.failed,
                    "sync finished"
                );
                Ok(report)
            }
            Err(err) => {
                error!(fabric = %name, operation_id = %op.id, error = %err, "sync aborted");
                op.fail(err.to_string(), summary);
                Err(SyncError::Aborted {
                    fabric: name.0.clone(),
                    reason: err.to_string(),
                    partial: Box::new(report),
                })
            }
        };

        let saved = store::save_operation_at(&self.home, &op);
        let released = lock.release();
        saved?;
        released?;
        result
    }

    async fn execute(
        &self,
        direction: SyncDirection,
        op_id: &OperationId,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        match direction {
            SyncDirection::GithubToGui => self.pull(op_id, report).await,
            SyncDirection::GuiToGithub => self.push(op_id, report).await,
            SyncDirection::Bidirectional => {
                self.pull(op_id, report).await?;
                if report.cancelled {
                    return Ok(());
                }
                self.push(op_id, report).await?;
                if report.cancelled {
                    return Ok(());
                }
                self.refresh_drift(report)
            }
        }
    }

    /// `true` (and the report marked) once cancellation was requested.
    pub(crate) fn checkpoint(&self, report: &mut SyncReport) -> bool {
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.cancelled
    }

    // -----------------------------------------------------------------------
    // GitHub → GUI
    // -----------------------------------------------------------------------

    async fn pull(&self, op_id: &OperationId, report: &mut SyncReport) -> Result<(), SyncError> {
        if self.fabric.repository.ingest_raw {
            self.ingest_raw(op_id, report).await?;
            if report.cancelled {
                return Ok(());
            }
        }

        let managed_dir = self.fabric.repository.managed_dir.as_str();
        let listing = with_retry(&self.retry, "list managed directory", || {
            self.host.list_dir(managed_dir)
        })
        .await?;

        let rows = store::list_resources_at(&self.home, &self.fabric.name)?;
        let by_path: HashMap<&str, &Resource> = rows
            .iter()
            .filter_map(|r| r.managed_file_path().map(|p| (p, r)))
            .collect();

        // Read everything first: a repository failure here aborts with no
        // row touched.
        let mut snapshot = HashStore::new();
        let mut pulled = Vec::new();
        let mut seen: HashMap<ResourceKey, String> = HashMap::new();
        for entry in &listing {
            if self.checkpoint(report) {
                return Ok(());
            }
            if !is_manifest_file(Path::new(&entry.path)) {
                continue;
            }
            snapshot.insert(entry.path.clone(), entry.hash.clone());

            if let Some(row) = by_path.get(entry.path.as_str()) {
                if row.file_hash() == Some(entry.hash.as_str()) {
                    debug!(fabric = %self.fabric.name, path = %entry.path, "unchanged");
                    seen.insert(row.key(), entry.path.clone());
                    report.unchanged.push(row.key());
                    continue;
                }
            }

            let file = match with_retry(&self.retry, "read managed file", || {
                self.host.read_file(&entry.path)
            })
            .await
            {
                Ok(file) => file,
                Err(GitError::NotFound { .. }) => {
                    report.fail(entry.path.clone(), "file disappeared while syncing");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match parse_managed(&file.path, &file.content) {
                Ok(manifest) => pulled.push(PulledFile {
                    path: entry.path.clone(),
                    hash: entry.hash.clone(),
                    manifest,
                }),
                Err(reason) => {
                    warn!(fabric = %self.fabric.name, path = %entry.path, error = %reason, "skipping managed file");
                    report.fail(entry.path.clone(), reason);
                }
            }
        }

        for file in pulled {
            if self.checkpoint(report) {
                return Ok(());
            }
            let key = file.manifest.key();
            if let Some(first) = seen.get(&key) {
                report.fail(
                    file.path.clone(),
                    format!("duplicate resource {key}, already defined in {first}"),
                );
                continue;
            }
            seen.insert(key.clone(), file.path.clone());
            match self.apply_pulled(file, report) {
                Ok(()) => {}
                Err(SyncError::Store(err @ StoreError::VersionConflict { .. })) => {
                    warn!(fabric = %self.fabric.name, resource = %key, error = %err, "row changed during pull");
                    report.fail(key.to_string(), err);
                }
                Err(err) => return Err(err),
            }
        }

        let mut missing: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| r.managed_file_path())
            .filter(|p| p.starts_with(managed_dir) && !snapshot.contains_key(*p))
            .map(str::to_string)
            .collect();
        if let Some(previous) = hash_store::load_at(&self.home, &self.fabric.name)? {
            missing.extend(hash_store::vanished(&previous.files, &snapshot));
        }
        for path in &missing {
            warn!(fabric = %self.fabric.name, path = %path, "managed file missing from repository");
        }
        report.missing_in_git = missing.into_iter().collect();

        hash_store::save_at(
            &self.home,
            &self.fabric.name,
            &HashStoreFile {
                synced_at: Utc::now(),
                files: snapshot,
            },
        )?;
        Ok(())
    }

    fn apply_pulled(&self, file: PulledFile, report: &mut SyncReport) -> Result<(), SyncError> {
        let key = file.manifest.key();
        let now = Utc::now();
        let mut row = match store::find_resource_at(&self.home, &self.fabric.name, &key)? {
            Some(row) => row,
            None => Resource::new(
                self.fabric.name.clone(),
                key.clone(),
                file.manifest.api_version.clone(),
                self.fabric.default_direction,
                now,
            ),
        };
        if !row.sync_direction.pulls() {
            report.skipped.push(SkippedItem {
                key,
                reason: SkipReason::DirectionDisabled,
            });
            return Ok(());
        }

        match row.apply_desired(
            &file.manifest.api_version,
            file.manifest.spec,
            &file.path,
            &file.hash,
            now,
        ) {
            DesiredUpdate::Applied => {
                store::save_resource_at(&self.home, &mut row)?;
                info!(fabric = %self.fabric.name, resource = %key, path = %file.path, "desired state updated from repository");
                report.record_drift(key.clone(), resource_drift(&row));
                report.record_synced(key, file.path);
            }
            DesiredUpdate::Unchanged => {
                debug!(fabric = %self.fabric.name, resource = %key, "unchanged");
                report.unchanged.push(key);
            }
            DesiredUpdate::BlockedByConflict => {
                warn!(fabric = %self.fabric.name, resource = %key, "repository change held back by unresolved conflict");
                report.skipped.push(SkippedItem {
                    key,
                    reason: SkipReason::ConflictPending,
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // GUI → GitHub
    // -----------------------------------------------------------------------

    async fn push(&self, op_id: &OperationId, report: &mut SyncReport) -> Result<(), SyncError> {
        let rows = store::list_resources_at(&self.home, &self.fabric.name)?;
        for row in rows {
            if !row.has_pending_draft() {
                continue;
            }
            if self.checkpoint(report) {
                return Ok(());
            }
            let key = row.key();
            if !row.sync_direction.pushes() {
                report.skipped.push(SkippedItem {
                    key,
                    reason: SkipReason::DirectionDisabled,
                });
                continue;
            }
            if row.is_conflicted() {
                report.skipped.push(SkippedItem {
                    key,
                    reason: SkipReason::ConflictPending,
                });
                continue;
            }

            match self.push_one(row, op_id, report).await {
                Ok(()) => {}
                Err(SyncError::Git(err)) if err.is_fatal() => return Err(SyncError::Git(err)),
                Err(
                    err @ (SyncError::Git(_)
                    | SyncError::Render(_)
                    | SyncError::Store(StoreError::VersionConflict { .. })),
                ) => {
                    warn!(fabric = %self.fabric.name, resource = %key, error = %err, "draft not pushed");
                    report.fail(key.to_string(), err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn push_one(
        &self,
        row: Resource,
        op_id: &OperationId,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let key = row.key();
        let Some(draft) = row.draft_spec().cloned() else {
            return Ok(());
        };
        let path = self.managed_path_for(&row)?;

        let git_updated = with_retry(&self.retry, "read last-modified time", || {
            self.host.last_modified(&path)
        })
        .await?;
        if detect_conflict(row.draft_updated_at(), git_updated, row.last_file_sync()) {
            return self.flag_conflict(&key, path, report);
        }

        let manifest = manifest_for(&row, draft.clone());
        let content =
            self.renderer
                .render_manifest(&self.fabric.name, &manifest, &self.fabric.repository.managed_dir)?;
        let action = if row.file_hash().is_some() {
            CommitAction::Update
        } else {
            CommitAction::Create
        };
        let message = self.renderer.commit_message(
            &self
                .context_for(&row)
                .with_action(action)
                .with_operation(op_id),
        )?;

        let expected = row.file_hash().map(str::to_string);
        let commit = match with_retry(&self.retry, "commit managed file", || {
            self.host
                .write_file(&path, &content, &message, expected.as_deref())
        })
        .await
        {
            Ok(commit) => commit,
            Err(GitError::Stale { .. }) => return self.flag_conflict(&key, path, report),
            Err(err) => return Err(err.into()),
        };
        info!(fabric = %self.fabric.name, resource = %key, path = %commit.path, commit = %commit.commit, "draft committed");

        self.record_commit(&key, row.api_version(), draft, commit, report)
    }

    fn record_commit(
        &self,
        key: &ResourceKey,
        api_version: &str,
        pushed: SpecDocument,
        commit: CommitInfo,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let (row, promoted) = self.update_row(key, |row| {
            if row.draft_spec() == Some(&pushed) {
                row.commit_draft(&commit.path, &commit.hash, commit.committed_at)
            } else {
                row.apply_desired(
                    api_version,
                    pushed.clone(),
                    &commit.path,
                    &commit.hash,
                    commit.committed_at,
                );
                false
            }
        })?;
        if !promoted {
            warn!(fabric = %self.fabric.name, resource = %key, "draft changed while committing; newer draft stays pending");
        }
        report.record_drift(key.clone(), resource_drift(&row));
        report.record_synced(key.clone(), commit.path);
        Ok(())
    }

    fn flag_conflict(
        &self,
        key: &ResourceKey,
        path: String,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.update_row(key, |row| row.mark_conflict(Utc::now()))?;
        warn!(fabric = %self.fabric.name, resource = %key, path = %path, "conflict detected; draft not pushed");
        report.conflicts.push(ConflictItem {
            key: key.clone(),
            path: Some(path),
        });
        Ok(())
    }

    fn refresh_drift(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        for row in store::list_resources_at(&self.home, &self.fabric.name)? {
            report.record_drift(row.key(), resource_drift(&row));
        }
        report.drift.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // GUI edits
    // -----------------------------------------------------------------------

    /// Stage a GUI edit on an existing resource.
    ///
    /// With `expected_version`, the edit is rejected if the row has moved on
    /// since the caller read it.
    pub fn stage_draft(
        &self,
        key: &ResourceKey,
        spec: SpecDocument,
        expected_version: Option<u64>,
    ) -> Result<Resource, SyncError> {
        let mut row = store::load_resource_at(&self.home, &self.fabric.name, key)?;
        if let Some(expected) = expected_version {
            if row.version() != expected {
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    expected,
                    found: row.version(),
                }
                .into());
            }
        }
        if !row.sync_direction.pushes() {
            return Err(SyncError::DirectionDisabled {
                key: key.to_string(),
                direction: SyncDirection::GuiToGithub,
            });
        }
        let staged = row.stage_draft(spec, Utc::now());
        store::save_resource_at(&self.home, &mut row)?;
        if staged {
            info!(fabric = %self.fabric.name, resource = %key, "draft staged");
        } else {
            info!(fabric = %self.fabric.name, resource = %key, "edit matches repository; draft cleared");
        }
        Ok(row)
    }

    /// Create a resource from the GUI. It reaches Git on the next push.
    pub fn create_resource(
        &self,
        key: ResourceKey,
        api_version: &str,
        spec: SpecDocument,
    ) -> Result<Resource, SyncError> {
        if store::find_resource_at(&self.home, &self.fabric.name, &key)?.is_some() {
            return Err(SyncError::ResourceExists {
                key: key.to_string(),
            });
        }
        let now = Utc::now();
        let mut row = Resource::new(
            self.fabric.name.clone(),
            key.clone(),
            api_version,
            self.fabric.default_direction,
            now,
        );
        row.stage_draft(spec, now);
        store::save_resource_at(&self.home, &mut row).map_err(|err| match err {
            StoreError::VersionConflict { .. } => SyncError::ResourceExists {
                key: key.to_string(),
            },
            other => other.into(),
        })?;
        info!(fabric = %self.fabric.name, resource = %key, "resource created");
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Cluster observation
    // -----------------------------------------------------------------------

    /// Record the live state of every resource and report drift.
    ///
    /// Does not take the fabric lock: it only writes `actual_spec`, and row
    /// saves are version-checked.
    pub async fn observe_cluster(&self, cluster: &dyn ClusterReader) -> Result<ObserveReport, SyncError> {
        let mut report = ObserveReport {
            fabric: self.fabric.name.clone(),
            observed: 0,
            changed: vec![],
            drift: vec![],
            failed: vec![],
            cancelled: false,
        };
        for row in store::list_resources_at(&self.home, &self.fabric.name)? {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let key = row.key();
            let actual = match cluster.read(&key, row.api_version()).await {
                Ok(actual) => actual,
                Err(err @ ClusterError::Unavailable(_)) => return Err(err.into()),
                Err(err) => {
                    warn!(fabric = %self.fabric.name, resource = %key, error = %err, "cannot observe resource");
                    report.failed.push(ItemFailure {
                        item: key.to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let (row, changed) =
                self.update_row(&key, |row| row.record_observed(actual.clone(), Utc::now()))?;
            report.observed += 1;
            if changed {
                debug!(fabric = %self.fabric.name, resource = %key, "actual state changed");
                report.changed.push(key.clone());
            }
            report.drift.push(DriftEntry::new(key, resource_drift(&row)));
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    /// Resolve a detected conflict. Never called automatically.
    pub async fn resolve_conflict(
        &self,
        key: &ResourceKey,
        policy: ResolutionPolicy,
    ) -> Result<Resource, SyncError> {
        let lock = self.lock(&OperationId::new(), "resolve")?;
        let row = store::load_resource_at(&self.home, &self.fabric.name, key)?;
        if !row.is_conflicted() {
            return Err(SyncError::NotConflicted {
                key: key.to_string(),
            });
        }
        let path = self.managed_path_for(&row)?;
        let remote = match with_retry(&self.retry, "read managed file", || {
            self.host.read_file(&path)
        })
        .await
        {
            Ok(file) => Some(file),
            Err(GitError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        let remote_hash = remote.as_ref().map(|f| f.hash.clone());
        let now = Utc::now();

        let (row, resolved) = match policy {
            ResolutionPolicy::PreferGit => {
                let git = match &remote {
                    Some(file) => {
                        let manifest = parse_managed(&file.path, &file.content)
                            .map_err(|reason| GitError::Invalid(format!("{path}: {reason}")))?;
                        Some((manifest.spec, path.clone(), file.hash.clone()))
                    }
                    None => None,
                };
                self.update_row(key, |row| row.resolve_prefer_git(git.clone(), now))?
            }
            ResolutionPolicy::PreferGui => {
                if row.draft_spec().is_none() {
                    return Err(SyncError::NoDraft {
                        key: key.to_string(),
                    });
                }
                self.update_row(key, |row| row.resolve_prefer_gui(remote_hash.clone(), now))?
            }
            ResolutionPolicy::Merge(merged) => self.update_row(key, |row| {
                row.resolve_with_merge(merged.clone(), remote_hash.clone(), now)
            })?,
        };
        lock.release()?;
        if !resolved {
            return Err(SyncError::NotConflicted {
                key: key.to_string(),
            });
        }
        info!(fabric = %self.fabric.name, resource = %key, "conflict resolved");
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Fabric deletion
    // -----------------------------------------------------------------------

    /// Delete the fabric and every resource row; with `remove_files`, also
    /// delete each backing managed file from the repository.
    pub async fn delete_fabric(self, remove_files: bool) -> Result<DeleteReport, SyncError> {
        let name = self.fabric.name.clone();
        let op_id = OperationId::new();
        let lock = self.lock(&op_id, "delete")?;
        let rows = store::delete_fabric_at(&self.home, &name)?;
        hash_store::remove_at(&self.home, &name)?;
        // The lock file went with the fabric directory.
        drop(lock);
        info!(fabric = %name, resources = rows.len(), "fabric deleted");

        let mut report = DeleteReport {
            fabric: name.clone(),
            resources: rows.len(),
            removed_files: vec![],
            failed: vec![],
        };
        if !remove_files {
            return Ok(report);
        }
        for row in &rows {
            let (Some(path), Some(hash)) = (row.managed_file_path(), row.file_hash()) else {
                continue;
            };
            let message = self.renderer.commit_message(
                &self
                    .context_for(row)
                    .with_action(CommitAction::Delete)
                    .with_operation(&op_id),
            )?;
            match with_retry(&self.retry, "delete managed file", || {
                self.host.delete_file(path, &message, Some(hash))
            })
            .await
            {
                Ok(()) | Err(GitError::NotFound { .. }) => {
                    info!(fabric = %name, path = %path, "managed file removed");
                    report.removed_files.push(path.to_string());
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    warn!(fabric = %name, path = %path, error = %err, "managed file left in place");
                    report.failed.push(ItemFailure {
                        item: path.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    pub(crate) fn host(&self) -> &dyn GitHost {
        self.host.as_ref()
    }

    pub(crate) fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn lock(&self, op_id: &OperationId, holder: &str) -> Result<FabricLock, SyncError> {
        FabricLock::acquire(&self.home, &self.fabric.name, op_id, holder, self.stale_lock_after)
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    fn context_for(&self, row: &Resource) -> TemplateContext {
        TemplateContext::for_resource(
            &self.fabric.name,
            &row.key(),
            row.api_version(),
            &self.fabric.repository.managed_dir,
        )
    }

    fn managed_path_for(&self, row: &Resource) -> Result<String, SyncError> {
        match row.managed_file_path() {
            Some(path) => Ok(path.to_string()),
            None => Ok(self.renderer.managed_path(&self.context_for(row))?),
        }
    }

    /// Load, mutate and save a row, reloading when a concurrent writer won
    /// the version race.
    fn update_row<T>(
        &self,
        key: &ResourceKey,
        mut mutate: impl FnMut(&mut Resource) -> T,
    ) -> Result<(Resource, T), SyncError> {
        let mut attempt = 0;
        loop {
            let mut row = store::load_resource_at(&self.home, &self.fabric.name, key)?;
            let out = mutate(&mut row);
            match store::save_resource_at(&self.home, &mut row) {
                Ok(()) => return Ok((row, out)),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_ROW_RETRIES => {
                    attempt += 1;
                    debug!(fabric = %self.fabric.name, resource = %key, attempt, "row changed concurrently, reloading");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// A managed file holds exactly one manifest.
pub(crate) fn parse_managed(path: &str, content: &str) -> Result<Manifest, String> {
    let mut manifests = parse_documents(Path::new(path), content).map_err(|e| e.to_string())?;
    if manifests.len() != 1 {
        return Err(format!(
            "{path}: managed files hold exactly one manifest, found {}",
            manifests.len()
        ));
    }
    Ok(manifests.remove(0))
}

fn manifest_for(row: &Resource, spec: SpecDocument) -> Manifest {
    Manifest {
        api_version: row.api_version().to_string(),
        kind: row.kind().to_string(),
        metadata: ManifestMetadata {
            name: row.name().to_string(),
            namespace: (row.namespace() != DEFAULT_NAMESPACE).then(|| row.namespace().to_string()),
        },
        spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_files_hold_one_manifest() {
        let one = "apiVersion: v1\nkind: VPC\nmetadata:\n  name: a\nspec: {}\n";
        assert_eq!(parse_managed("m/a.yaml", one).unwrap().metadata.name, "a");

        let two = format!("{one}---\n{}", one.replace("name: a", "name: b"));
        let err = parse_managed("m/a.yaml", &two).unwrap_err();
        assert!(err.contains("exactly one manifest"));

        assert!(parse_managed("m/a.yaml", "kind: [").is_err());
    }
}
