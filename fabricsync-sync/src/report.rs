//! Structured per-item outcome of a sync operation.

use serde::Serialize;

use fabricsync_core::types::{
    FabricName, OperationId, OperationSummary, ResourceKey, SyncDirection,
};

use crate::drift::{DriftReport, DriftStatus, FieldDiff};

/// A resource written in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedItem {
    pub key: ResourceKey,
    pub path: String,
}

/// A resource flagged or blocked by a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictItem {
    pub key: ResourceKey,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The resource's `sync_direction` excludes this direction.
    DirectionDisabled,
    /// The resource is already `detected` and waits for an operator.
    ConflictPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub key: ResourceKey,
    pub reason: SkipReason,
}

/// A file or resource that failed on its own without aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Repository path or resource key.
    pub item: String,
    pub error: String,
}

/// A raw file moved into the managed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedFile {
    pub raw_path: String,
    pub managed_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftEntry {
    pub key: ResourceKey,
    pub status: DriftStatus,
    pub diffs: Vec<FieldDiff>,
}

impl DriftEntry {
    pub fn new(key: ResourceKey, report: DriftReport) -> Self {
        Self {
            key,
            status: report.status,
            diffs: report.diffs,
        }
    }
}

/// Everything a caller needs to act on the result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub operation_id: OperationId,
    pub fabric: FabricName,
    pub direction: SyncDirection,
    pub synced: Vec<SyncedItem>,
    pub unchanged: Vec<ResourceKey>,
    pub conflicts: Vec<ConflictItem>,
    pub skipped: Vec<SkippedItem>,
    pub failed: Vec<ItemFailure>,
    /// Managed paths of known resources that no longer exist in Git.
    pub missing_in_git: Vec<String>,
    pub ingested: Vec<IngestedFile>,
    pub drift: Vec<DriftEntry>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(operation_id: OperationId, fabric: FabricName, direction: SyncDirection) -> Self {
        Self {
            operation_id,
            fabric,
            direction,
            synced: vec![],
            unchanged: vec![],
            conflicts: vec![],
            skipped: vec![],
            failed: vec![],
            missing_in_git: vec![],
            ingested: vec![],
            drift: vec![],
            cancelled: false,
        }
    }

    pub fn summary(&self) -> OperationSummary {
        let pending = self
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::ConflictPending)
            .count();
        OperationSummary {
            synced: self.synced.len(),
            unchanged: self.unchanged.len(),
            skipped_conflict: self.conflicts.len() + pending,
            failed: self.failed.len(),
        }
    }

    /// Record `key` as written. A resource pulled and then pushed in the
    /// same operation is listed once, with its latest path.
    pub(crate) fn record_synced(&mut self, key: ResourceKey, path: String) {
        self.unchanged.retain(|k| k != &key);
        if let Some(item) = self.synced.iter_mut().find(|item| item.key == key) {
            item.path = path;
            return;
        }
        self.synced.push(SyncedItem { key, path });
    }

    /// Replace or add the drift entry for `key`.
    pub(crate) fn record_drift(&mut self, key: ResourceKey, report: DriftReport) {
        self.drift.retain(|d| d.key != key);
        self.drift.push(DriftEntry::new(key, report));
    }

    pub(crate) fn fail(&mut self, item: impl Into<String>, error: impl ToString) {
        self.failed.push(ItemFailure {
            item: item.into(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_pending_conflicts() {
        let mut report = SyncReport::new(
            OperationId::from("op"),
            FabricName::from("lab"),
            SyncDirection::Bidirectional,
        );
        report.conflicts.push(ConflictItem {
            key: ResourceKey::new("VPC", "default", "vpc-2"),
            path: None,
        });
        report.skipped.push(SkippedItem {
            key: ResourceKey::new("VPC", "default", "vpc-3"),
            reason: SkipReason::ConflictPending,
        });
        report.skipped.push(SkippedItem {
            key: ResourceKey::new("VPC", "default", "vpc-4"),
            reason: SkipReason::DirectionDisabled,
        });
        report.fail("managed/vpcs/bad.yaml", "bad yaml");

        let summary = report.summary();
        assert_eq!(summary.skipped_conflict, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.synced, 0);
    }

    #[test]
    fn resource_written_twice_is_listed_once() {
        let mut report = SyncReport::new(
            OperationId::from("op"),
            FabricName::from("lab"),
            SyncDirection::Bidirectional,
        );
        let vpc1 = ResourceKey::new("VPC", "default", "vpc-1");
        let vpc2 = ResourceKey::new("VPC", "default", "vpc-2");
        report.unchanged.push(vpc2.clone());

        report.record_synced(vpc1.clone(), "managed/vpcs/vpc-1.yaml".into());
        report.record_synced(vpc1.clone(), "managed/vpcs/vpc-1.yml".into());
        report.record_synced(vpc2.clone(), "managed/vpcs/vpc-2.yaml".into());

        assert_eq!(report.synced.len(), 2);
        assert_eq!(report.synced[0].key, vpc1);
        assert_eq!(report.synced[0].path, "managed/vpcs/vpc-1.yml");
        assert!(report.unchanged.is_empty());
        assert_eq!(report.summary().synced, 2);
    }
}
