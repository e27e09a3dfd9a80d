//! Domain types for fabricsync.
//!
//! All path fields use `PathBuf`. All types are serializable/deserializable via
//! serde + serde_yaml. Spec documents are generic JSON maps: their shape is
//! only checked when a manifest is parsed, never inside the sync core.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured document stored in `desired_spec`, `draft_spec` and `actual_spec`.
pub type SpecDocument = Map<String, Value>;

/// Namespace used when a manifest or resource reference omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a fabric (one managed environment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FabricName(pub String);

impl fmt::Display for FabricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FabricName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FabricName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a single sync operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    /// Fresh random (v4) operation id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a resource inside a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = String;

    /// Accepts `kind/name` (default namespace) or `kind/namespace/name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(format!("invalid resource reference '{s}'"));
        }
        match parts.as_slice() {
            [kind, name] => Ok(Self::new(*kind, DEFAULT_NAMESPACE, *name)),
            [kind, namespace, name] => Ok(Self::new(*kind, *namespace, *name)),
            _ => Err(format!(
                "invalid resource reference '{s}'; expected kind/name or kind/namespace/name"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest (on-disk CRD shape)
// ---------------------------------------------------------------------------

/// Metadata block of a custom resource manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A Kubernetes custom resource document as stored in the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    #[serde(default)]
    pub spec: SpecDocument,
}

impl Manifest {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.kind.clone(),
            self.metadata
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            self.metadata.name.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side is allowed to drive a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    GithubToGui,
    GuiToGithub,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    /// Whether Git content may overwrite `desired_spec`.
    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::GithubToGui | SyncDirection::Bidirectional)
    }

    /// Whether drafts may be committed to Git.
    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::GuiToGithub | SyncDirection::Bidirectional)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::GithubToGui => write!(f, "github_to_gui"),
            SyncDirection::GuiToGithub => write!(f, "gui_to_github"),
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "github_to_gui" | "pull" => Ok(SyncDirection::GithubToGui),
            "gui_to_github" | "push" => Ok(SyncDirection::GuiToGithub),
            "bidirectional" | "both" => Ok(SyncDirection::Bidirectional),
            other => Err(format!(
                "unknown sync direction '{other}'; expected: github_to_gui, gui_to_github, bidirectional"
            )),
        }
    }
}

/// Conflict state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    None,
    Detected,
    Resolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStatus::None => write!(f, "none"),
            ConflictStatus::Detected => write!(f, "detected"),
            ConflictStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Lifecycle of a sync operation:
/// `pending → running → {succeeded, failed, conflict_detected, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    ConflictDetected,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Pending | OperationState::Running)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
            OperationState::ConflictDetected => "conflict_detected",
            OperationState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// Result of offering Git content to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredUpdate {
    Applied,
    Unchanged,
    BlockedByConflict,
}

/// One managed custom resource, tracked across Git, GUI and cluster.
///
/// Spec fields are private: they only change through the transition methods
/// below, which keep `file_hash`, `last_file_sync` and `conflict_status`
/// consistent with the documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    fabric: FabricName,
    kind: String,
    namespace: String,
    name: String,
    api_version: String,
    #[serde(default)]
    desired_spec: Option<SpecDocument>,
    #[serde(default)]
    draft_spec: Option<SpecDocument>,
    #[serde(default)]
    draft_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    actual_spec: Option<SpecDocument>,
    #[serde(default)]
    actual_observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    managed_file_path: Option<String>,
    #[serde(default)]
    file_hash: Option<String>,
    #[serde(default)]
    last_file_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_direction: SyncDirection,
    #[serde(default)]
    conflict_status: ConflictStatus,
    #[serde(default)]
    conflict_detected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        fabric: FabricName,
        key: ResourceKey,
        api_version: impl Into<String>,
        sync_direction: SyncDirection,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fabric,
            kind: key.kind,
            namespace: key.namespace,
            name: key.name,
            api_version: api_version.into(),
            desired_spec: None,
            draft_spec: None,
            draft_updated_at: None,
            actual_spec: None,
            actual_observed_at: None,
            managed_file_path: None,
            file_hash: None,
            last_file_sync: None,
            sync_direction,
            conflict_status: ConflictStatus::None,
            conflict_detected_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn fabric(&self) -> &FabricName {
        &self.fabric
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind.clone(), self.namespace.clone(), self.name.clone())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn desired_spec(&self) -> Option<&SpecDocument> {
        self.desired_spec.as_ref()
    }

    pub fn draft_spec(&self) -> Option<&SpecDocument> {
        self.draft_spec.as_ref()
    }

    pub fn draft_updated_at(&self) -> Option<DateTime<Utc>> {
        self.draft_updated_at
    }

    pub fn actual_spec(&self) -> Option<&SpecDocument> {
        self.actual_spec.as_ref()
    }

    pub fn actual_observed_at(&self) -> Option<DateTime<Utc>> {
        self.actual_observed_at
    }

    pub fn managed_file_path(&self) -> Option<&str> {
        self.managed_file_path.as_deref()
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.file_hash.as_deref()
    }

    pub fn last_file_sync(&self) -> Option<DateTime<Utc>> {
        self.last_file_sync
    }

    pub fn conflict_status(&self) -> ConflictStatus {
        self.conflict_status
    }

    pub fn conflict_detected_at(&self) -> Option<DateTime<Utc>> {
        self.conflict_detected_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// A draft exists, differs from what Git last held, and was staged no
    /// earlier than the last file sync.
    pub fn has_pending_draft(&self) -> bool {
        let newer = match (self.draft_updated_at, self.last_file_sync) {
            (Some(draft_at), Some(synced_at)) => draft_at >= synced_at,
            _ => true,
        };
        match (&self.draft_spec, &self.desired_spec) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(draft), Some(desired)) => draft != desired && newer,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        self.conflict_status == ConflictStatus::Detected
    }

    // -- transitions --------------------------------------------------------

    /// Git → GUI: record the repository content as `desired_spec`.
    ///
    /// `last_file_sync` only advances when no draft is pending, so that a
    /// later push still sees the Git change as concurrent with the draft.
    pub fn apply_desired(
        &mut self,
        api_version: &str,
        spec: SpecDocument,
        path: &str,
        hash: &str,
        synced_at: DateTime<Utc>,
    ) -> DesiredUpdate {
        if self.is_conflicted() {
            return DesiredUpdate::BlockedByConflict;
        }
        let unchanged = self.desired_spec.as_ref() == Some(&spec)
            && self.file_hash.as_deref() == Some(hash)
            && self.managed_file_path.as_deref() == Some(path)
            && self.api_version == api_version;
        if unchanged {
            return DesiredUpdate::Unchanged;
        }

        let pending = self.has_pending_draft();
        if !pending {
            // A draft that is not pending can never be pushed; drop it before
            // the baseline moves past it.
            self.draft_spec = None;
            self.draft_updated_at = None;
        }
        self.api_version = api_version.to_string();
        self.desired_spec = Some(spec);
        self.managed_file_path = Some(path.to_string());
        self.file_hash = Some(hash.to_string());
        if !pending {
            self.last_file_sync = Some(synced_at);
        } else if self.draft_spec == self.desired_spec {
            // Git caught up with the draft.
            self.draft_spec = None;
            self.draft_updated_at = None;
        }
        if self.conflict_status == ConflictStatus::Resolved {
            self.conflict_status = ConflictStatus::None;
        }
        self.updated_at = synced_at;
        DesiredUpdate::Applied
    }

    /// GUI edit: stage an uncommitted `draft_spec`.
    ///
    /// An edit identical to `desired_spec` clears any staged draft instead.
    /// Returns `true` when a draft is left staged.
    pub fn stage_draft(&mut self, spec: SpecDocument, at: DateTime<Utc>) -> bool {
        if self.desired_spec.as_ref() == Some(&spec) {
            self.discard_draft(at);
            return false;
        }
        self.draft_spec = Some(spec);
        self.draft_updated_at = Some(at);
        self.updated_at = at;
        true
    }

    /// Drop the staged draft without committing it.
    pub fn discard_draft(&mut self, at: DateTime<Utc>) {
        self.draft_spec = None;
        self.draft_updated_at = None;
        self.updated_at = at;
    }

    /// GUI → Git succeeded: `desired_spec := draft_spec`, clear the draft.
    ///
    /// Returns `false` without mutating when there is no draft or the
    /// resource is in conflict.
    pub fn commit_draft(&mut self, path: &str, hash: &str, committed_at: DateTime<Utc>) -> bool {
        if self.is_conflicted() {
            return false;
        }
        let Some(draft) = self.draft_spec.take() else {
            return false;
        };
        self.desired_spec = Some(draft);
        self.draft_updated_at = None;
        self.managed_file_path = Some(path.to_string());
        self.file_hash = Some(hash.to_string());
        self.last_file_sync = Some(committed_at);
        if self.conflict_status == ConflictStatus::Resolved {
            self.conflict_status = ConflictStatus::None;
        }
        self.updated_at = committed_at;
        true
    }

    /// Cluster poll: record the live state (`None` when the object is absent).
    pub fn record_observed(&mut self, spec: Option<SpecDocument>, at: DateTime<Utc>) -> bool {
        self.actual_observed_at = Some(at);
        if self.actual_spec == spec {
            return false;
        }
        self.actual_spec = spec;
        self.updated_at = at;
        true
    }

    /// Flag concurrent GUI/Git modification. Never touches `desired_spec`.
    pub fn mark_conflict(&mut self, at: DateTime<Utc>) {
        self.conflict_status = ConflictStatus::Detected;
        self.conflict_detected_at = Some(at);
        self.updated_at = at;
    }

    /// Resolve by keeping Git: discard the draft and adopt the Git content.
    pub fn resolve_prefer_git(
        &mut self,
        git: Option<(SpecDocument, String, String)>,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.is_conflicted() {
            return false;
        }
        self.draft_spec = None;
        self.draft_updated_at = None;
        if let Some((spec, path, hash)) = git {
            self.desired_spec = Some(spec);
            self.managed_file_path = Some(path);
            self.file_hash = Some(hash);
        }
        self.last_file_sync = Some(at);
        self.conflict_status = ConflictStatus::Resolved;
        self.updated_at = at;
        true
    }

    /// Resolve by keeping the GUI draft: re-baseline on the current Git hash
    /// so the next push overwrites Git deliberately.
    pub fn resolve_prefer_gui(&mut self, remote_hash: Option<String>, at: DateTime<Utc>) -> bool {
        if !self.is_conflicted() || self.draft_spec.is_none() {
            return false;
        }
        self.file_hash = remote_hash;
        self.last_file_sync = Some(at);
        self.draft_updated_at = Some(at);
        self.conflict_status = ConflictStatus::Resolved;
        self.updated_at = at;
        true
    }

    /// Resolve with an operator-merged document, which becomes the draft.
    pub fn resolve_with_merge(
        &mut self,
        merged: SpecDocument,
        remote_hash: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.is_conflicted() {
            return false;
        }
        self.draft_spec = Some(merged);
        self.draft_updated_at = Some(at);
        self.file_hash = remote_hash;
        self.last_file_sync = Some(at);
        self.conflict_status = ConflictStatus::Resolved;
        self.updated_at = at;
        true
    }
}

// ---------------------------------------------------------------------------
// Fabric
// ---------------------------------------------------------------------------

fn default_managed_dir() -> String {
    "managed".to_string()
}

fn default_raw_dir() -> String {
    "raw".to_string()
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Where the fabric's Git content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositorySource {
    /// A working tree on the local filesystem.
    Local { path: PathBuf },
    /// A GitHub repository accessed through the REST API.
    #[serde(rename = "github")]
    GitHub {
        owner: String,
        repo: String,
        #[serde(default = "default_branch")]
        branch: String,
        /// Name of the environment variable holding the API token.
        #[serde(default = "default_token_env")]
        token_env: String,
    },
}

impl fmt::Display for RepositorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositorySource::Local { path } => write!(f, "{}", path.display()),
            RepositorySource::GitHub {
                owner,
                repo,
                branch,
                ..
            } => write!(f, "github:{owner}/{repo}@{branch}"),
        }
    }
}

/// Repository mapping for a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub source: RepositorySource,
    /// Authoritative, machine-written manifests.
    #[serde(default = "default_managed_dir")]
    pub managed_dir: String,
    /// Pending hand-written manifests awaiting ingestion.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: String,
    #[serde(default = "default_true")]
    pub ingest_raw: bool,
}

impl RepositoryConfig {
    pub fn new(source: RepositorySource) -> Self {
        Self {
            source,
            managed_dir: default_managed_dir(),
            raw_dir: default_raw_dir(),
            ingest_raw: true,
        }
    }
}

/// How live cluster state is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterConfig {
    /// Kubernetes API via kubeconfig (optional context override).
    Kube {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Directory of exported manifests (`kubectl get -o yaml` dumps).
    Snapshot { path: PathBuf },
}

/// Aggregate root: one managed environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fabric {
    pub name: FabricName,
    pub repository: RepositoryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
    #[serde(default)]
    pub default_direction: SyncDirection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync operations
// ---------------------------------------------------------------------------

/// Item counts of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OperationSummary {
    pub synced: usize,
    pub unchanged: usize,
    pub skipped_conflict: usize,
    pub failed: usize,
}

/// Persisted record of one sync operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    pub fabric: FabricName,
    pub direction: SyncDirection,
    /// Trigger label, e.g. `cli`, `scheduler`, `watcher`, `socket`.
    pub source: String,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub summary: OperationSummary,
}

impl SyncOperation {
    pub fn pending(fabric: FabricName, direction: SyncDirection, source: impl Into<String>) -> Self {
        Self {
            id: OperationId::new(),
            fabric,
            direction,
            source: source.into(),
            state: OperationState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            summary: OperationSummary::default(),
        }
    }

    /// `pending → running`.
    pub fn start(&mut self) -> bool {
        if self.state != OperationState::Pending {
            return false;
        }
        self.state = OperationState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// `running → succeeded | conflict_detected`.
    pub fn finish(&mut self, summary: OperationSummary) -> bool {
        let state = if summary.skipped_conflict > 0 {
            OperationState::ConflictDetected
        } else {
            OperationState::Succeeded
        };
        self.terminate(state, summary, None)
    }

    /// `running → failed`, keeping whatever partial counts were reached.
    pub fn fail(&mut self, error: impl Into<String>, summary: OperationSummary) -> bool {
        self.terminate(OperationState::Failed, summary, Some(error.into()))
    }

    /// `running → cancelled`.
    pub fn cancel(&mut self, summary: OperationSummary) -> bool {
        self.terminate(OperationState::Cancelled, summary, None)
    }

    fn terminate(
        &mut self,
        state: OperationState,
        summary: OperationSummary,
        error: Option<String>,
    ) -> bool {
        if self.state != OperationState::Running {
            return false;
        }
        self.state = state;
        self.summary = summary;
        self.error = error;
        self.finished_at = Some(Utc::now());
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn spec(value: Value) -> SpecDocument {
        value.as_object().cloned().expect("object")
    }

    fn vpc(now: DateTime<Utc>) -> Resource {
        Resource::new(
            FabricName::from("lab"),
            ResourceKey::new("VPC", "default", "vpc-1"),
            "vpc.githedgehog.com/v1beta1",
            SyncDirection::Bidirectional,
            now,
        )
    }

    #[test]
    fn resource_key_parse_and_display() {
        let short: ResourceKey = "VPC/vpc-1".parse().expect("short form");
        assert_eq!(short.namespace, DEFAULT_NAMESPACE);
        assert_eq!(short.to_string(), "VPC/default/vpc-1");

        let long: ResourceKey = "Connection/fab/leaf-1".parse().expect("long form");
        assert_eq!(long, ResourceKey::new("Connection", "fab", "leaf-1"));

        assert!("VPC".parse::<ResourceKey>().is_err());
        assert!("VPC//x".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn direction_parse_accepts_aliases() {
        assert_eq!("pull".parse::<SyncDirection>(), Ok(SyncDirection::GithubToGui));
        assert_eq!(
            "gui-to-github".parse::<SyncDirection>(),
            Ok(SyncDirection::GuiToGithub)
        );
        assert!("sideways".parse::<SyncDirection>().is_err());
        assert_eq!(SyncDirection::Bidirectional.to_string(), "bidirectional");
    }

    #[test]
    fn apply_desired_is_idempotent() {
        let now = Utc::now();
        let mut r = vpc(now);
        let doc = spec(json!({"subnets": ["10.0.0.0/24"]}));
        assert_eq!(
            r.apply_desired("v1", doc.clone(), "managed/vpcs/vpc-1.yaml", "abc", now),
            DesiredUpdate::Applied
        );
        assert_eq!(
            r.apply_desired("v1", doc, "managed/vpcs/vpc-1.yaml", "abc", now),
            DesiredUpdate::Unchanged
        );
        assert_eq!(r.last_file_sync(), Some(now));
    }

    #[test]
    fn apply_desired_keeps_baseline_while_draft_pending() {
        let t0 = Utc::now() - Duration::minutes(10);
        let mut r = vpc(t0);
        r.apply_desired("v1", spec(json!({"a": 1})), "p", "h1", t0);
        r.stage_draft(spec(json!({"a": 2})), t0 + Duration::minutes(1));

        let t2 = t0 + Duration::minutes(2);
        assert_eq!(
            r.apply_desired("v1", spec(json!({"a": 3})), "p", "h2", t2),
            DesiredUpdate::Applied
        );
        assert_eq!(r.last_file_sync(), Some(t0), "baseline must not advance");
        assert_eq!(r.file_hash(), Some("h2"));
    }

    #[test]
    fn conflicted_resource_rejects_automated_updates() {
        let now = Utc::now();
        let mut r = vpc(now);
        r.apply_desired("v1", spec(json!({"a": 1})), "p", "h1", now);
        r.stage_draft(spec(json!({"a": 2})), now);
        r.mark_conflict(now);

        assert_eq!(
            r.apply_desired("v1", spec(json!({"a": 9})), "p", "h9", now),
            DesiredUpdate::BlockedByConflict
        );
        assert!(!r.commit_draft("p", "h3", now));
        assert_eq!(r.desired_spec(), Some(&spec(json!({"a": 1}))));
    }

    #[test]
    fn commit_draft_promotes_and_clears() {
        let now = Utc::now();
        let mut r = vpc(now);
        r.stage_draft(spec(json!({"a": 2})), now);
        assert!(r.has_pending_draft());
        assert!(r.commit_draft("p", "h2", now));
        assert_eq!(r.desired_spec(), Some(&spec(json!({"a": 2}))));
        assert!(r.draft_spec().is_none());
        assert!(!r.has_pending_draft());
        assert_eq!(r.file_hash(), Some("h2"));
    }

    #[test]
    fn draft_equal_to_desired_is_cleared() {
        let now = Utc::now();
        let mut r = vpc(now);
        r.apply_desired("v1", spec(json!({"a": 1})), "p", "h1", now);
        assert!(r.stage_draft(spec(json!({"a": 2})), now));

        assert!(!r.stage_draft(spec(json!({"a": 1})), now));
        assert!(r.draft_spec().is_none());
        assert!(r.draft_updated_at().is_none());
        assert!(!r.has_pending_draft());
    }

    #[test]
    fn draft_older_than_baseline_is_not_pending() {
        let t0 = Utc::now() - Duration::minutes(10);
        let mut r = vpc(t0);
        r.apply_desired("v1", spec(json!({"a": 1})), "p", "h1", t0);
        r.stage_draft(spec(json!({"a": 2})), t0 + Duration::minutes(1));

        // Git catches up with the draft, then moves on.
        r.apply_desired("v1", spec(json!({"a": 2})), "p", "h2", t0 + Duration::minutes(2));
        assert!(r.draft_spec().is_none(), "draft matched Git");

        r.draft_spec = Some(spec(json!({"a": 2})));
        r.draft_updated_at = Some(t0 + Duration::minutes(1));
        let t3 = t0 + Duration::minutes(3);
        r.apply_desired("v1", spec(json!({"a": 3})), "p", "h3", t3);
        assert!(!r.has_pending_draft());
        assert!(r.draft_spec().is_none());
        assert_eq!(r.last_file_sync(), Some(t3));
    }

    #[test]
    fn resolution_policies_require_detected_conflict() {
        let now = Utc::now();
        let mut r = vpc(now);
        r.stage_draft(spec(json!({"a": 2})), now);
        assert!(!r.resolve_prefer_gui(Some("h".into()), now));

        r.mark_conflict(now);
        assert!(r.resolve_prefer_gui(Some("h".into()), now));
        assert_eq!(r.conflict_status(), ConflictStatus::Resolved);
        assert_eq!(r.draft_updated_at(), r.last_file_sync());
    }

    #[test]
    fn operation_lifecycle_transitions() {
        let mut op = SyncOperation::pending(FabricName::from("lab"), SyncDirection::Bidirectional, "cli");
        assert!(!op.finish(OperationSummary::default()), "pending cannot finish");
        assert!(op.start());
        assert!(!op.start());
        let summary = OperationSummary {
            skipped_conflict: 1,
            ..OperationSummary::default()
        };
        assert!(op.finish(summary));
        assert_eq!(op.state, OperationState::ConflictDetected);
        assert!(op.state.is_terminal());
    }

    #[test]
    fn manifest_key_defaults_namespace() {
        let manifest: Manifest = serde_yaml::from_str(
            "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: vpc-1\nspec:\n  subnets: {}\n",
        )
        .expect("parse");
        assert_eq!(manifest.key(), ResourceKey::new("VPC", "default", "vpc-1"));
    }
}
