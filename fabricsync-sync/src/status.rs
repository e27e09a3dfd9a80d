//! Sync status summary for `fabricsync status` and the daemon.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fabricsync_core::store;
use fabricsync_core::types::{
    ConflictStatus, FabricName, ResourceKey, SyncDirection, SyncOperation,
};

use crate::drift::{resource_drift, DriftStatus};
use crate::error::SyncError;
use crate::hash_store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub key: ResourceKey,
    pub api_version: String,
    pub drift: DriftStatus,
    pub conflict: ConflictStatus,
    pub pending_draft: bool,
    pub sync_direction: SyncDirection,
    pub managed_file_path: Option<String>,
    pub last_file_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub in_sync: usize,
    pub drifted: usize,
    pub unknown: usize,
    pub conflicts: usize,
    pub pending_drafts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FabricStatus {
    pub fabric: FabricName,
    pub repository: String,
    pub counts: StatusCounts,
    pub resources: Vec<ResourceStatus>,
    /// `operation-id (holder)` while a sync is running.
    pub lock_holder: Option<String>,
    pub last_operation: Option<SyncOperation>,
    /// Time of the last completed pull.
    pub last_pull: Option<DateTime<Utc>>,
}

/// Status of one fabric.
pub fn fabric_status(home: &Path, name: &FabricName) -> Result<FabricStatus, SyncError> {
    let fabric = store::load_fabric_at(home, name)?;
    let rows = store::list_resources_at(home, name)?;

    let mut counts = StatusCounts {
        total: rows.len(),
        ..StatusCounts::default()
    };
    let mut resources = Vec::with_capacity(rows.len());
    for row in &rows {
        let drift = resource_drift(row).status;
        match drift {
            DriftStatus::InSync => counts.in_sync += 1,
            DriftStatus::Drifted => counts.drifted += 1,
            DriftStatus::Unknown => counts.unknown += 1,
        }
        if row.is_conflicted() {
            counts.conflicts += 1;
        }
        if row.has_pending_draft() {
            counts.pending_drafts += 1;
        }
        resources.push(ResourceStatus {
            key: row.key(),
            api_version: row.api_version().to_string(),
            drift,
            conflict: row.conflict_status(),
            pending_draft: row.has_pending_draft(),
            sync_direction: row.sync_direction,
            managed_file_path: row.managed_file_path().map(str::to_string),
            last_file_sync: row.last_file_sync(),
        });
    }

    let lock_holder = store::read_lock_at(home, name)?
        .map(|lock| format!("{} ({})", lock.operation_id, lock.holder));
    let last_operation = store::last_operation_at(home, name)?;
    let last_pull = hash_store::load_at(home, name)?.map(|s| s.synced_at);

    Ok(FabricStatus {
        fabric: fabric.name,
        repository: fabric.repository.source.to_string(),
        counts,
        resources,
        lock_holder,
        last_operation,
        last_pull,
    })
}

/// Status of every registered fabric, in name order.
pub fn all_status(home: &Path) -> Result<Vec<FabricStatus>, SyncError> {
    store::list_fabrics_at(home)?
        .iter()
        .map(|fabric| fabric_status(home, &fabric.name))
        .collect()
}
