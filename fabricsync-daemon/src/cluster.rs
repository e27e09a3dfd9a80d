//! Live cluster access for the poller and `fabricsync observe`.

use std::path::Path;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::config::KubeConfigOptions;
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info};

use fabricsync_core::types::{ClusterConfig, Fabric, ResourceKey, SpecDocument};
use fabricsync_detector::plural_for_kind;
use fabricsync_sync::{
    CancellationFlag, ClusterError, ClusterReader, ObserveReport, Orchestrator, SnapshotCluster,
};

use crate::error::DaemonError;

/// Reads custom resources through the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the local kubeconfig, optionally pinned to `context`.
    pub async fn connect(context: Option<&str>) -> Result<Self, ClusterError> {
        let config = match context {
            Some(context) => Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.to_string()),
                ..KubeConfigOptions::default()
            })
            .await
            .map_err(|e| ClusterError::Unavailable(format!("kubeconfig context {context}: {e}")))?,
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Unavailable(format!("kubeconfig: {e}")))?,
        };
        let client = Client::try_from(config)
            .map_err(|e| ClusterError::Unavailable(format!("kubernetes client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn read(
        &self,
        key: &ResourceKey,
        api_version: &str,
    ) -> Result<Option<SpecDocument>, ClusterError> {
        let resource = api_resource(&key.kind, api_version);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, &resource);
        match api.get_opt(&key.name).await {
            Ok(Some(object)) => spec_of(key, &object.data).map(Some),
            Ok(None) => Ok(None),
            // Rejections for one kind (RBAC, unknown CRD version) stay per resource.
            Err(kube::Error::Api(response)) => Err(ClusterError::Parse(format!(
                "{key}: {} ({})",
                response.message, response.code
            ))),
            Err(err) => Err(ClusterError::Unavailable(err.to_string())),
        }
    }
}

/// `group/version` + kind → the dynamic API resource.
pub fn api_resource(kind: &str, api_version: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural_for_kind(kind),
    }
}

fn spec_of(key: &ResourceKey, data: &Value) -> Result<SpecDocument, ClusterError> {
    match data.get("spec") {
        Some(Value::Object(spec)) => Ok(spec.clone()),
        None | Some(Value::Null) => Ok(SpecDocument::new()),
        Some(other) => Err(ClusterError::Parse(format!(
            "{key}: spec is not a mapping ({other})"
        ))),
    }
}

/// The reader configured for a fabric.
pub async fn reader_for(config: &ClusterConfig) -> Result<Box<dyn ClusterReader>, ClusterError> {
    match config {
        ClusterConfig::Snapshot { path } => Ok(Box::new(SnapshotCluster::new(path.clone()))),
        ClusterConfig::Kube { context } => {
            Ok(Box::new(KubeCluster::connect(context.as_deref()).await?))
        }
    }
}

/// One observation pass for `fabric`; `None` when it has no cluster configured.
pub async fn observe_fabric(
    home: &Path,
    fabric: &Fabric,
    cancel: &CancellationFlag,
) -> Result<Option<ObserveReport>, DaemonError> {
    let Some(config) = &fabric.cluster else {
        debug!(fabric = %fabric.name, "no cluster configured");
        return Ok(None);
    };
    let reader = reader_for(config).await?;
    let orchestrator = Orchestrator::open(home, &fabric.name)?.with_cancellation(cancel.clone());
    let report = orchestrator.observe_cluster(reader.as_ref()).await?;
    info!(
        fabric = %fabric.name,
        observed = report.observed,
        changed = report.changed.len(),
        failed = report.failed.len(),
        "cluster observed"
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricsync_core::store;
    use fabricsync_core::types::{FabricName, RepositoryConfig, RepositorySource, SyncDirection};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn grouped_api_version_splits() {
        let resource = api_resource("VPC", "vpc.githedgehog.com/v1beta1");
        assert_eq!(resource.group, "vpc.githedgehog.com");
        assert_eq!(resource.version, "v1beta1");
        assert_eq!(resource.plural, "vpcs");
    }

    #[test]
    fn core_api_version_has_empty_group() {
        let resource = api_resource("ConfigMap", "v1");
        assert_eq!(resource.group, "");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.api_version, "v1");
    }

    #[test]
    fn dynamic_object_spec_is_extracted() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "vpc.githedgehog.com/v1beta1",
            "kind": "VPC",
            "metadata": {"name": "vpc-1", "namespace": "default"},
            "spec": {"subnets": {"default": {"subnet": "10.0.1.0/24"}}},
            "status": {"applied": true}
        }))
        .unwrap();
        let key = ResourceKey::new("VPC", "default", "vpc-1");
        let spec = spec_of(&key, &object.data).unwrap();
        assert_eq!(spec["subnets"]["default"]["subnet"], json!("10.0.1.0/24"));
        assert!(!spec.contains_key("status"));

        let err = spec_of(&key, &json!({"spec": [1, 2]})).unwrap_err();
        assert!(matches!(err, ClusterError::Parse(_)));
        assert!(spec_of(&key, &json!({})).unwrap().is_empty());
    }

    #[tokio::test]
    async fn fabric_without_cluster_is_skipped() {
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let fabric = store::init_fabric_at(
            home.path(),
            FabricName::from("lab"),
            RepositoryConfig::new(RepositorySource::Local {
                path: repo.path().to_path_buf(),
            }),
            None,
            SyncDirection::Bidirectional,
        )
        .unwrap();
        let report = observe_fabric(home.path(), &fabric, &CancellationFlag::new())
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn snapshot_cluster_is_observed() {
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let snapshot = TempDir::new().unwrap();
        std::fs::write(
            snapshot.path().join("vpc-1.yaml"),
            "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: vpc-1\nspec:\n  vlan: 1001\n",
        )
        .unwrap();
        let fabric = store::init_fabric_at(
            home.path(),
            FabricName::from("lab"),
            RepositoryConfig::new(RepositorySource::Local {
                path: repo.path().to_path_buf(),
            }),
            Some(ClusterConfig::Snapshot {
                path: snapshot.path().to_path_buf(),
            }),
            SyncDirection::Bidirectional,
        )
        .unwrap();
        let orch = Orchestrator::open(home.path(), &fabric.name).unwrap();
        orch.create_resource(
            ResourceKey::new("VPC", "default", "vpc-1"),
            "vpc.githedgehog.com/v1beta1",
            json!({"vlan": 1001}).as_object().cloned().unwrap(),
        )
        .unwrap();

        let report = observe_fabric(home.path(), &fabric, &CancellationFlag::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.changed.len(), 1);
    }
}
