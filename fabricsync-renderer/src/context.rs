//! Template context: serializable rendering payload built from a resource identity.

use serde::{Deserialize, Serialize};

use fabricsync_core::types::{FabricName, Manifest, OperationId, ResourceKey};
use fabricsync_detector::plural_for_kind;

use crate::error::RenderError;

/// What a commit does to its file; rendered as the subject verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitAction {
    Create,
    Update,
    Ingest,
    Delete,
}

impl std::fmt::Display for CommitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitAction::Create => "Create",
            CommitAction::Update => "Update",
            CommitAction::Ingest => "Ingest",
            CommitAction::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

/// Flat rendering payload shared by every template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub fabric: String,
    pub kind: String,
    /// Lower-case plural of `kind`, the per-kind directory name.
    pub plural: String,
    pub namespace: String,
    pub name: String,
    pub api_version: String,
    pub managed_dir: String,
    pub action: Option<CommitAction>,
    pub operation_id: Option<String>,
}

impl TemplateContext {
    /// Build a context from a resource identity.
    pub fn for_resource(
        fabric: &FabricName,
        key: &ResourceKey,
        api_version: &str,
        managed_dir: &str,
    ) -> Self {
        TemplateContext {
            fabric: fabric.0.clone(),
            kind: key.kind.clone(),
            plural: plural_for_kind(&key.kind),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            api_version: api_version.to_string(),
            managed_dir: managed_dir.trim_end_matches('/').to_string(),
            action: None,
            operation_id: None,
        }
    }

    /// Build a context from a parsed manifest.
    pub fn for_manifest(fabric: &FabricName, manifest: &Manifest, managed_dir: &str) -> Self {
        Self::for_resource(fabric, &manifest.key(), &manifest.api_version, managed_dir)
    }

    pub fn with_action(mut self, action: CommitAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_operation(mut self, id: &OperationId) -> Self {
        self.operation_id = Some(id.0.clone());
        self
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}
