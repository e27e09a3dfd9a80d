//! Read side of the live cluster, used to populate `actual_spec`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use fabricsync_core::types::{ResourceKey, SpecDocument};
use fabricsync_detector::{is_manifest_file, parse_file};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot interpret cluster object: {0}")]
    Parse(String),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

/// Reads the current spec of one custom resource. `None` means the object
/// does not exist in the cluster.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn read(
        &self,
        key: &ResourceKey,
        api_version: &str,
    ) -> Result<Option<SpecDocument>, ClusterError>;
}

// ---------------------------------------------------------------------------
// StaticCluster
// ---------------------------------------------------------------------------

/// In-memory cluster state.
#[derive(Debug, Default)]
pub struct StaticCluster {
    objects: Mutex<HashMap<ResourceKey, SpecDocument>>,
}

impl StaticCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ResourceKey, spec: SpecDocument) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key, spec);
        }
    }

    pub fn remove(&self, key: &ResourceKey) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.remove(key);
        }
    }
}

#[async_trait]
impl ClusterReader for StaticCluster {
    async fn read(
        &self,
        key: &ResourceKey,
        _api_version: &str,
    ) -> Result<Option<SpecDocument>, ClusterError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| ClusterError::Unavailable("state lock poisoned".into()))?;
        Ok(objects.get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// SnapshotCluster
// ---------------------------------------------------------------------------

/// A directory of exported manifests (`kubectl get -o yaml` dumps), re-read
/// on every call.
#[derive(Debug, Clone)]
pub struct SnapshotCluster {
    dir: PathBuf,
}

impl SnapshotCluster {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn load(&self) -> Result<HashMap<ResourceKey, SpecDocument>, ClusterError> {
        if !self.dir.is_dir() {
            return Err(ClusterError::Unavailable(format!(
                "snapshot directory {} does not exist",
                self.dir.display()
            )));
        }
        let mut files = Vec::new();
        collect(&self.dir, &mut files)?;
        files.sort();

        let mut objects = HashMap::new();
        for path in files {
            match parse_file(&path) {
                Ok(manifests) => {
                    for manifest in manifests {
                        objects.insert(manifest.key(), manifest.spec);
                    }
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping snapshot file"),
            }
        }
        debug!(dir = %self.dir.display(), objects = objects.len(), "loaded cluster snapshot");
        Ok(objects)
    }
}

#[async_trait]
impl ClusterReader for SnapshotCluster {
    async fn read(
        &self,
        key: &ResourceKey,
        _api_version: &str,
    ) -> Result<Option<SpecDocument>, ClusterError> {
        Ok(self.load()?.remove(key))
    }
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ClusterError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ClusterError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ClusterError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out)?;
        } else if is_manifest_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn static_cluster_returns_inserted_objects() {
        let cluster = StaticCluster::new();
        let key = ResourceKey::new("VPC", "default", "vpc-1");
        assert!(cluster.read(&key, "v1").await.unwrap().is_none());

        let spec = json!({"subnets": ["10.0.0.0/24"]}).as_object().cloned().unwrap();
        cluster.insert(key.clone(), spec.clone());
        assert_eq!(cluster.read(&key, "v1").await.unwrap(), Some(spec));

        cluster.remove(&key);
        assert!(cluster.read(&key, "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_cluster_reads_exported_manifests() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("vpcs.yaml"),
            "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: vpc-1\nspec:\n  subnets:\n    - 10.0.0.0/24\n---\napiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: vpc-2\nspec: {}\n",
        )
        .unwrap();
        let cluster = SnapshotCluster::new(dir.path().to_path_buf());

        let vpc1 = cluster
            .read(&ResourceKey::new("VPC", "default", "vpc-1"), "v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vpc1.get("subnets"), Some(&json!(["10.0.0.0/24"])));
        assert!(cluster
            .read(&ResourceKey::new("VPC", "default", "vpc-9"), "v1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_snapshot_dir_is_unavailable() {
        let cluster = SnapshotCluster::new(PathBuf::from("/no/such/fabricsync/snapshot"));
        let err = cluster
            .read(&ResourceKey::new("VPC", "default", "vpc-1"), "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable(_)));
    }
}
