//! RAII guard over the per-fabric `sync.lock`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use fabricsync_core::error::StoreError;
use fabricsync_core::store;
use fabricsync_core::types::{FabricName, OperationId};

use crate::error::SyncError;

/// Holds the fabric lock until [`FabricLock::release`] or drop.
#[derive(Debug)]
pub struct FabricLock {
    home: PathBuf,
    fabric: FabricName,
    operation_id: OperationId,
    released: bool,
}

impl FabricLock {
    /// Take the lock or fail fast with [`SyncError::LockContention`].
    ///
    /// With `stale_after`, a lock older than that is broken first and its
    /// operation marked failed.
    pub fn acquire(
        home: &Path,
        fabric: &FabricName,
        operation_id: &OperationId,
        holder: &str,
        stale_after: Option<Duration>,
    ) -> Result<Self, SyncError> {
        if let Some(max_age) = stale_after {
            if let Some(stale) = store::break_stale_lock_at(home, fabric, max_age)? {
                warn!(
                    fabric = %fabric,
                    operation_id = %stale.operation_id,
                    holder = %stale.holder,
                    acquired_at = %stale.acquired_at,
                    "broke stale sync lock"
                );
            }
        }
        match store::acquire_lock_at(home, fabric, operation_id, holder) {
            Ok(_) => Ok(Self {
                home: home.to_path_buf(),
                fabric: fabric.clone(),
                operation_id: operation_id.clone(),
                released: false,
            }),
            Err(StoreError::LockHeld { fabric, holder }) => {
                Err(SyncError::LockContention { fabric, holder })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn release(mut self) -> Result<(), SyncError> {
        self.released = true;
        store::release_lock_at(&self.home, &self.fabric, &self.operation_id)?;
        Ok(())
    }
}

impl Drop for FabricLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = store::release_lock_at(&self.home, &self.fabric, &self.operation_id) {
            warn!(fabric = %self.fabric, error = %err, "failed to release sync lock");
        }
    }
}
