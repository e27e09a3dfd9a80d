//! File-backed persistence for fabrics, resource rows, operations and locks.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fabricsync/
//!   fabrics/
//!     <fabric>/
//!       fabric.yaml                              (mode 0600)
//!       sync.lock                                (present while a sync runs)
//!       resources/<kind>/<namespace>/<name>.yaml (one row per resource)
//!       operations/<id>.yaml                     (sync operation records)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{
    ClusterConfig, Fabric, FabricName, OperationId, OperationState, RepositoryConfig, Resource,
    ResourceKey, SyncDirection, SyncOperation,
};

const FABRIC_FILE: &str = "fabric.yaml";
const LOCK_FILE: &str = "sync.lock";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.fabricsync`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".fabricsync")
}

/// `<home>/.fabricsync/fabrics/<fabric>/`: pure, no I/O.
pub fn fabric_dir_at(home: &Path, fabric: &FabricName) -> PathBuf {
    root_at(home).join("fabrics").join(&fabric.0)
}

/// `<home>/.fabricsync/fabrics/<fabric>/fabric.yaml`: pure, no I/O.
pub fn fabric_path_at(home: &Path, fabric: &FabricName) -> PathBuf {
    fabric_dir_at(home, fabric).join(FABRIC_FILE)
}

/// `<home>/.fabricsync/fabrics/<fabric>/resources/<kind>/<namespace>/<name>.yaml`
pub fn resource_path_at(home: &Path, fabric: &FabricName, key: &ResourceKey) -> PathBuf {
    fabric_dir_at(home, fabric)
        .join("resources")
        .join(&key.kind)
        .join(&key.namespace)
        .join(format!("{}.yaml", key.name))
}

/// `<home>/.fabricsync/fabrics/<fabric>/sync.lock`
pub fn lock_path_at(home: &Path, fabric: &FabricName) -> PathBuf {
    fabric_dir_at(home, fabric).join(LOCK_FILE)
}

fn operations_dir_at(home: &Path, fabric: &FabricName) -> PathBuf {
    fabric_dir_at(home, fabric).join("operations")
}

fn operation_path_at(home: &Path, fabric: &FabricName, id: &OperationId) -> PathBuf {
    operations_dir_at(home, fabric).join(format!("{}.yaml", id.0))
}

// ---------------------------------------------------------------------------
// 2. Fabrics
// ---------------------------------------------------------------------------

/// Register a new fabric.
///
/// Fails with [`StoreError::FabricExists`] if one is already registered under
/// the same name.
pub fn init_fabric_at(
    home: &Path,
    name: FabricName,
    repository: RepositoryConfig,
    cluster: Option<ClusterConfig>,
    default_direction: SyncDirection,
) -> Result<Fabric, StoreError> {
    validate_name(&name.0)?;
    let path = fabric_path_at(home, &name);
    if path.exists() {
        return Err(StoreError::FabricExists { fabric: name.0 });
    }
    let now = Utc::now();
    let fabric = Fabric {
        name,
        repository,
        cluster,
        default_direction,
        created_at: now,
        updated_at: now,
    };
    save_fabric_at(home, &fabric)?;
    Ok(fabric)
}

/// `init_fabric_at` convenience wrapper.
pub fn init_fabric(
    name: FabricName,
    repository: RepositoryConfig,
    cluster: Option<ClusterConfig>,
    default_direction: SyncDirection,
) -> Result<Fabric, StoreError> {
    init_fabric_at(&home()?, name, repository, cluster, default_direction)
}

/// Load a fabric record.
pub fn load_fabric_at(home: &Path, name: &FabricName) -> Result<Fabric, StoreError> {
    let path = fabric_path_at(home, name);
    if !path.exists() {
        return Err(StoreError::FabricNotFound {
            fabric: name.0.clone(),
            path,
        });
    }
    read_yaml(&path)
}

/// `load_fabric_at` convenience wrapper.
pub fn load_fabric(name: &FabricName) -> Result<Fabric, StoreError> {
    load_fabric_at(&home()?, name)
}

/// Atomically save a fabric record.
pub fn save_fabric_at(home: &Path, fabric: &Fabric) -> Result<(), StoreError> {
    let dir = fabric_dir_at(home, &fabric.name);
    ensure_dir(&dir)?;
    write_yaml_atomic(&dir.join(FABRIC_FILE), fabric)
}

/// All registered fabrics sorted by name.
pub fn list_fabrics_at(home: &Path) -> Result<Vec<Fabric>, StoreError> {
    let dir = root_at(home).join("fabrics");
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut fabrics = Vec::new();
    for entry in entries {
        let path = entry.path().join(FABRIC_FILE);
        if !path.exists() {
            continue;
        }
        fabrics.push(read_yaml(&path)?);
    }
    Ok(fabrics)
}

/// `list_fabrics_at` convenience wrapper.
pub fn list_fabrics() -> Result<Vec<Fabric>, StoreError> {
    list_fabrics_at(&home()?)
}

/// Delete a fabric and cascade to every resource row, operation record and
/// lock. Returns the deleted resources so callers can remove backing files.
pub fn delete_fabric_at(home: &Path, name: &FabricName) -> Result<Vec<Resource>, StoreError> {
    let dir = fabric_dir_at(home, name);
    if !dir.join(FABRIC_FILE).exists() {
        return Err(StoreError::FabricNotFound {
            fabric: name.0.clone(),
            path: dir.join(FABRIC_FILE),
        });
    }
    let resources = list_resources_at(home, name)?;
    std::fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    Ok(resources)
}

// ---------------------------------------------------------------------------
// 3. Resources
// ---------------------------------------------------------------------------

/// Load a resource row, failing if it does not exist.
pub fn load_resource_at(
    home: &Path,
    fabric: &FabricName,
    key: &ResourceKey,
) -> Result<Resource, StoreError> {
    find_resource_at(home, fabric, key)?.ok_or_else(|| StoreError::ResourceNotFound {
        fabric: fabric.0.clone(),
        key: key.to_string(),
    })
}

/// Look up a resource row by identity.
pub fn find_resource_at(
    home: &Path,
    fabric: &FabricName,
    key: &ResourceKey,
) -> Result<Option<Resource>, StoreError> {
    let path = resource_path_at(home, fabric, key);
    if !path.exists() {
        return Ok(None);
    }
    read_yaml(&path).map(Some)
}

/// Every resource row of a fabric, ordered by kind, namespace, name.
pub fn list_resources_at(home: &Path, fabric: &FabricName) -> Result<Vec<Resource>, StoreError> {
    let root = fabric_dir_at(home, fabric).join("resources");
    if !root.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_yaml_files(&root, &mut files)?;

    let mut resources: Vec<Resource> = Vec::with_capacity(files.len());
    for path in files {
        resources.push(read_yaml(&path)?);
    }
    resources.sort_by_key(|r| r.key());
    Ok(resources)
}

/// Save a resource row with optimistic concurrency.
///
/// `resource.version()` must equal the on-disk version (0 for a new row);
/// otherwise nothing is written and [`StoreError::VersionConflict`] is
/// returned. On success the version is incremented in place.
pub fn save_resource_at(home: &Path, resource: &mut Resource) -> Result<(), StoreError> {
    let key = resource.key();
    validate_name(&key.kind)?;
    validate_name(&key.namespace)?;
    validate_name(&key.name)?;

    let path = resource_path_at(home, resource.fabric(), &key);
    let found = if path.exists() {
        read_yaml::<Resource>(&path)?.version
    } else {
        0
    };
    if found != resource.version {
        return Err(StoreError::VersionConflict {
            key: key.to_string(),
            expected: resource.version,
            found,
        });
    }

    let Some(dir) = path.parent() else {
        return Err(StoreError::InvalidName(key.to_string()));
    };
    ensure_dir(dir)?;

    resource.version += 1;
    if let Err(err) = write_yaml_atomic(&path, resource) {
        resource.version -= 1;
        return Err(err);
    }
    Ok(())
}

/// Remove a resource row. Missing rows are not an error.
pub fn delete_resource_at(
    home: &Path,
    fabric: &FabricName,
    key: &ResourceKey,
) -> Result<(), StoreError> {
    let path = resource_path_at(home, fabric, key);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&path, err)),
    }
}

// ---------------------------------------------------------------------------
// 4. Per-fabric lock
// ---------------------------------------------------------------------------

/// Contents of `sync.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub operation_id: OperationId,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Take the exclusive sync lock for `fabric`.
///
/// Uses `create_new`, so exactly one caller wins even across processes; the
/// loser gets [`StoreError::LockHeld`] immediately.
pub fn acquire_lock_at(
    home: &Path,
    fabric: &FabricName,
    operation_id: &OperationId,
    holder: &str,
) -> Result<LockRecord, StoreError> {
    let dir = fabric_dir_at(home, fabric);
    if !dir.join(FABRIC_FILE).exists() {
        return Err(StoreError::FabricNotFound {
            fabric: fabric.0.clone(),
            path: dir.join(FABRIC_FILE),
        });
    }
    let path = dir.join(LOCK_FILE);
    let record = LockRecord {
        operation_id: operation_id.clone(),
        holder: holder.to_string(),
        acquired_at: Utc::now(),
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            let holder = read_lock_at(home, fabric)?
                .map(|lock| format!("{} ({})", lock.operation_id, lock.holder))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(StoreError::LockHeld {
                fabric: fabric.0.clone(),
                holder,
            });
        }
        Err(err) => return Err(io_err(&path, err)),
    };

    let yaml = serde_yaml::to_string(&record)?;
    if let Err(err) = file.write_all(yaml.as_bytes()) {
        let _ = std::fs::remove_file(&path);
        return Err(io_err(&path, err));
    }
    Ok(record)
}

/// Release the lock if (and only if) it is held by `operation_id`.
///
/// Returns `true` when a lock file was removed.
pub fn release_lock_at(
    home: &Path,
    fabric: &FabricName,
    operation_id: &OperationId,
) -> Result<bool, StoreError> {
    let Some(record) = read_lock_at(home, fabric)? else {
        return Ok(false);
    };
    if &record.operation_id != operation_id {
        return Ok(false);
    }
    let path = lock_path_at(home, fabric);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Remove the lock for `fabric` whoever holds it.
///
/// The operation named in the lock is marked `failed` with `reason` unless it
/// already finished. Returns the removed record, or `None` when unlocked.
pub fn break_lock_at(
    home: &Path,
    fabric: &FabricName,
    reason: &str,
) -> Result<Option<LockRecord>, StoreError> {
    let Some(record) = read_lock_at(home, fabric)? else {
        return Ok(None);
    };
    remove_lock_record_at(home, fabric, record, reason)
}

/// Break the lock only if it was acquired more than `max_age` ago.
///
/// A holder that dies without unwinding never releases `sync.lock`; this is
/// how the next caller takes over.
pub fn break_stale_lock_at(
    home: &Path,
    fabric: &FabricName,
    max_age: std::time::Duration,
) -> Result<Option<LockRecord>, StoreError> {
    let Some(record) = read_lock_at(home, fabric)? else {
        return Ok(None);
    };
    // A clock that moved backwards gives a negative age, which never expires.
    let age = (Utc::now() - record.acquired_at)
        .to_std()
        .unwrap_or_default();
    if age < max_age {
        return Ok(None);
    }
    let reason = format!(
        "sync lock held by {} since {} expired; holder presumed dead",
        record.holder,
        record.acquired_at.to_rfc3339()
    );
    remove_lock_record_at(home, fabric, record, &reason)
}

fn remove_lock_record_at(
    home: &Path,
    fabric: &FabricName,
    record: LockRecord,
    reason: &str,
) -> Result<Option<LockRecord>, StoreError> {
    let path = lock_path_at(home, fabric);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    }
    fail_orphaned_operation_at(home, fabric, &record.operation_id, reason)?;
    Ok(Some(record))
}

/// Mark an operation that lost its lock holder as `failed`.
fn fail_orphaned_operation_at(
    home: &Path,
    fabric: &FabricName,
    id: &OperationId,
    reason: &str,
) -> Result<bool, StoreError> {
    if !operation_path_at(home, fabric, id).exists() {
        return Ok(false);
    }
    let mut op = load_operation_at(home, fabric, id)?;
    if op.state.is_terminal() {
        return Ok(false);
    }
    if op.state == OperationState::Pending {
        op.start();
    }
    let summary = op.summary;
    op.fail(reason, summary);
    save_operation_at(home, &op)?;
    Ok(true)
}

/// Current lock holder, if any.
pub fn read_lock_at(home: &Path, fabric: &FabricName) -> Result<Option<LockRecord>, StoreError> {
    let path = lock_path_at(home, fabric);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    // A lock whose body is still being written is held all the same. Its age
    // comes from the file so that a writer killed mid-way still goes stale.
    if contents.trim().is_empty() {
        let acquired_at = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        return Ok(Some(LockRecord {
            operation_id: OperationId::from("unknown"),
            holder: "unknown".to_string(),
            acquired_at,
        }));
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Parse { path, source })
}

// ---------------------------------------------------------------------------
// 5. Operation records
// ---------------------------------------------------------------------------

/// Atomically persist an operation record.
pub fn save_operation_at(home: &Path, operation: &SyncOperation) -> Result<(), StoreError> {
    let dir = operations_dir_at(home, &operation.fabric);
    ensure_dir(&dir)?;
    write_yaml_atomic(&operation_path_at(home, &operation.fabric, &operation.id), operation)
}

/// Load one operation record.
pub fn load_operation_at(
    home: &Path,
    fabric: &FabricName,
    id: &OperationId,
) -> Result<SyncOperation, StoreError> {
    read_yaml(&operation_path_at(home, fabric, id))
}

/// All operation records of a fabric, newest first.
pub fn list_operations_at(
    home: &Path,
    fabric: &FabricName,
) -> Result<Vec<SyncOperation>, StoreError> {
    let dir = operations_dir_at(home, fabric);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_yaml_files(&dir, &mut files)?;
    let mut ops: Vec<SyncOperation> = Vec::with_capacity(files.len());
    for path in files {
        ops.push(read_yaml(&path)?);
    }
    ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(ops)
}

/// Most recent operation record, if any.
pub fn last_operation_at(
    home: &Path,
    fabric: &FabricName,
) -> Result<Option<SyncOperation>, StoreError> {
    Ok(list_operations_at(home, fabric)?.into_iter().next())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub(crate) fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
        if ty.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("yaml") {
            out.push(path);
        }
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
