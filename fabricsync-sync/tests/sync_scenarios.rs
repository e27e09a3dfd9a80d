use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use serde_json::json;
use tempfile::TempDir;

use fabricsync_core::store;
use fabricsync_core::types::{
    ConflictStatus, FabricName, OperationState, RepositoryConfig, RepositorySource, ResourceKey,
    SpecDocument, SyncDirection,
};
use fabricsync_sync::report::SkipReason;
use fabricsync_sync::{
    DriftStatus, FieldChange, LocalRepository, Orchestrator, ResolutionPolicy, StaticCluster,
};

const VPC_API: &str = "vpc.githedgehog.com/v1beta1";

struct Env {
    home: TempDir,
    repo: TempDir,
    fabric: FabricName,
}

impl Env {
    fn new() -> Self {
        let home = TempDir::new().expect("home");
        let repo = TempDir::new().expect("repo");
        let fabric = FabricName::from("lab");
        store::init_fabric_at(
            home.path(),
            fabric.clone(),
            RepositoryConfig::new(RepositorySource::Local {
                path: repo.path().to_path_buf(),
            }),
            None,
            SyncDirection::Bidirectional,
        )
        .expect("init fabric");
        Env { home, repo, fabric }
    }

    fn orchestrator(&self) -> Orchestrator {
        let fabric = store::load_fabric_at(self.home.path(), &self.fabric).expect("fabric");
        let host = Arc::new(LocalRepository::new(self.repo.path().to_path_buf()));
        Orchestrator::with_host(self.home.path(), fabric, host).expect("orchestrator")
    }

    /// Write a repository file with a modification time `age` in the past.
    fn write_repo(&self, rel: &str, content: &str, age: Duration) {
        let path = self.repo.path().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, content).expect("write");
        set_mtime(&path, SystemTime::now() - age);
    }

    fn read_repo(&self, rel: &str) -> String {
        fs::read_to_string(self.repo.path().join(rel)).expect("read repo file")
    }

    fn row(&self, key: &ResourceKey) -> fabricsync_core::types::Resource {
        store::load_resource_at(self.home.path(), &self.fabric, key).expect("row")
    }
}

fn set_mtime(path: &Path, at: SystemTime) {
    set_file_mtime(path, FileTime::from_system_time(at)).expect("set mtime");
}

fn vpc_manifest(name: &str, subnets: &[&str]) -> String {
    let items: String = subnets.iter().map(|s| format!("    - {s}\n")).collect();
    format!("apiVersion: {VPC_API}\nkind: VPC\nmetadata:\n  name: {name}\nspec:\n  subnets:\n{items}")
}

fn subnets(list: &[&str]) -> SpecDocument {
    json!({ "subnets": list }).as_object().cloned().expect("object")
}

fn vpc(name: &str) -> ResourceKey {
    ResourceKey::new("VPC", "default", name)
}

const HOUR: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// GitHub → GUI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pull_is_idempotent() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    env.write_repo("managed/vpcs/vpc-2.yaml", &vpc_manifest("vpc-2", &["10.0.2.0/24"]), HOUR);
    let orch = env.orchestrator();

    let first = orch.sync_github_to_gui().await.expect("first pull");
    assert_eq!(first.synced.len(), 2);
    let rows_before = store::list_resources_at(env.home.path(), &env.fabric).expect("rows");

    let second = orch.sync_github_to_gui().await.expect("second pull");
    assert!(second.synced.is_empty(), "no row should change: {second:?}");
    assert_eq!(second.unchanged.len(), 2);
    let rows_after = store::list_resources_at(env.home.path(), &env.fabric).expect("rows");
    assert_eq!(rows_before, rows_after);
}

#[tokio::test]
async fn malformed_file_is_reported_and_the_batch_continues() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    env.write_repo("managed/vpcs/vpc-2.yaml", "apiVersion: [unclosed\nkind: VPC\n", HOUR);
    env.write_repo("managed/vpcs/vpc-3.yaml", &vpc_manifest("vpc-3", &["10.0.3.0/24"]), HOUR);

    let report = env.orchestrator().sync_github_to_gui().await.expect("pull");
    let synced: Vec<&str> = report.synced.iter().map(|s| s.key.name.as_str()).collect();
    assert_eq!(synced, vec!["vpc-1", "vpc-3"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].item, "managed/vpcs/vpc-2.yaml");

    let op = store::last_operation_at(env.home.path(), &env.fabric)
        .expect("ops")
        .expect("op recorded");
    assert_eq!(op.state, OperationState::Succeeded);
    assert_eq!(op.summary.synced, 2);
    assert_eq!(op.summary.failed, 1);
}

#[tokio::test]
async fn removed_file_is_reported_missing_without_touching_rows() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");
    let before = env.row(&vpc("vpc-1"));

    fs::remove_file(env.repo.path().join("managed/vpcs/vpc-1.yaml")).expect("rm");
    let report = orch.sync_github_to_gui().await.expect("pull");
    assert_eq!(report.missing_in_git, vec!["managed/vpcs/vpc-1.yaml".to_string()]);
    assert_eq!(env.row(&vpc("vpc-1")), before);
}

#[tokio::test]
async fn raw_files_are_ingested_into_the_managed_tree() {
    let env = Env::new();
    let batch = format!(
        "{}---\napiVersion: wiring.githedgehog.com/v1beta1\nkind: Switch\nmetadata:\n  name: leaf-1\nspec:\n  role: server-leaf\n",
        vpc_manifest("vpc-a", &["10.1.0.0/24"])
    );
    env.write_repo("raw/batch.yaml", &batch, HOUR);
    env.write_repo("raw/broken.yaml", "kind: [\n", HOUR);

    let report = env.orchestrator().sync_github_to_gui().await.expect("pull");

    assert_eq!(report.ingested.len(), 1);
    assert_eq!(report.ingested[0].raw_path, "raw/batch.yaml");
    assert_eq!(
        report.ingested[0].managed_paths,
        vec![
            "managed/vpcs/vpc-a.yaml".to_string(),
            "managed/switches/leaf-1.yaml".to_string()
        ]
    );
    assert!(!env.repo.path().join("raw/batch.yaml").exists());
    assert!(env.repo.path().join("raw/broken.yaml").exists(), "unparseable raw file stays");
    assert!(report.failed.iter().any(|f| f.item == "raw/broken.yaml"));

    assert!(env
        .read_repo("managed/vpcs/vpc-a.yaml")
        .starts_with("# Managed by fabricsync"));
    assert_eq!(report.synced.len(), 2, "ingested manifests become rows in the same pull");
    let leaf = env.row(&ResourceKey::new("Switch", "default", "leaf-1"));
    assert_eq!(leaf.managed_file_path(), Some("managed/switches/leaf-1.yaml"));
}

// ---------------------------------------------------------------------------
// GUI → GitHub
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_resource_is_committed_and_promoted() {
    let env = Env::new();
    let orch = env.orchestrator();
    orch.create_resource(vpc("vpc-9"), VPC_API, subnets(&["10.9.0.0/24"]))
        .expect("create");

    let report = orch.sync_gui_to_github().await.expect("push");
    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.synced[0].path, "managed/vpcs/vpc-9.yaml");

    let row = env.row(&vpc("vpc-9"));
    assert_eq!(row.desired_spec(), Some(&subnets(&["10.9.0.0/24"])));
    assert!(row.draft_spec().is_none());
    assert!(row.file_hash().is_some());
    assert!(env.read_repo("managed/vpcs/vpc-9.yaml").contains("10.9.0.0/24"));

    let pull = orch.sync_github_to_gui().await.expect("pull");
    assert!(pull.synced.is_empty(), "own commit must not come back as a change");
}

#[tokio::test]
async fn draft_on_pulled_resource_is_pushed() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");

    orch.stage_draft(&vpc("vpc-1"), subnets(&["10.0.0.0/24", "10.0.1.0/24"]), None)
        .expect("stage");
    let report = orch.sync_gui_to_github().await.expect("push");
    assert_eq!(report.synced.len(), 1);
    assert!(report.conflicts.is_empty());
    assert!(env.read_repo("managed/vpcs/vpc-1.yaml").contains("10.0.1.0/24"));
    assert_eq!(env.row(&vpc("vpc-1")).conflict_status(), ConflictStatus::None);
}

#[tokio::test]
async fn stale_version_rejects_draft() {
    let env = Env::new();
    let orch = env.orchestrator();
    let row = orch
        .create_resource(vpc("vpc-1"), VPC_API, subnets(&["10.0.0.0/24"]))
        .expect("create");
    orch.stage_draft(&vpc("vpc-1"), subnets(&["10.0.5.0/24"]), Some(row.version()))
        .expect("first edit");
    let err = orch
        .stage_draft(&vpc("vpc-1"), subnets(&["10.0.6.0/24"]), Some(row.version()))
        .expect_err("second edit from the same base must fail");
    assert!(err.to_string().contains("modified concurrently"));
}

#[tokio::test]
async fn draft_matching_git_does_not_revert_later_git_edit() {
    let env = Env::new();
    let path = "managed/vpcs/vpc-1.yaml";
    env.write_repo(path, &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");

    let row = orch
        .stage_draft(&vpc("vpc-1"), subnets(&["10.0.0.0/24"]), None)
        .expect("stage");
    assert!(row.draft_spec().is_none(), "identical edit leaves no draft");
    assert!(!row.has_pending_draft());

    let external = env.repo.path().join(path);
    fs::write(&external, vpc_manifest("vpc-1", &["10.9.9.0/24"])).expect("external edit");
    set_mtime(&external, SystemTime::now() + Duration::from_secs(60));

    let report = orch.sync_bidirectional().await.expect("sync");
    assert!(report.conflicts.is_empty(), "{report:?}");
    assert_eq!(report.synced.len(), 1, "{report:?}");
    assert!(env.read_repo(path).contains("10.9.9.0/24"), "Git edit survives");
    let row = env.row(&vpc("vpc-1"));
    assert_eq!(row.desired_spec(), Some(&subnets(&["10.9.9.0/24"])));
    assert!(row.draft_spec().is_none());
}

#[tokio::test]
async fn draft_overtaken_by_git_is_dropped() {
    let env = Env::new();
    let path = "managed/vpcs/vpc-1.yaml";
    env.write_repo(path, &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");
    orch.stage_draft(&vpc("vpc-1"), subnets(&["10.0.1.0/24"]), None)
        .expect("stage");

    // Someone lands the same change in Git directly.
    let external = env.repo.path().join(path);
    fs::write(&external, vpc_manifest("vpc-1", &["10.0.1.0/24"])).expect("same edit");
    set_mtime(&external, SystemTime::now() + Duration::from_secs(60));
    let report = orch.sync_bidirectional().await.expect("sync");
    assert!(report.conflicts.is_empty(), "{report:?}");
    assert!(env.row(&vpc("vpc-1")).draft_spec().is_none());

    fs::write(&external, vpc_manifest("vpc-1", &["10.9.9.0/24"])).expect("later edit");
    set_mtime(&external, SystemTime::now() + Duration::from_secs(120));
    let report = orch.sync_bidirectional().await.expect("sync");
    assert!(report.conflicts.is_empty(), "{report:?}");
    assert!(env.read_repo(path).contains("10.9.9.0/24"), "Git edit survives");
    assert_eq!(
        env.row(&vpc("vpc-1")).desired_spec(),
        Some(&subnets(&["10.9.9.0/24"]))
    );
}

#[tokio::test]
async fn pulled_then_pushed_resource_is_listed_once() {
    let env = Env::new();
    let path = "managed/vpcs/vpc-1.yaml";
    env.write_repo(path, &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");
    orch.stage_draft(&vpc("vpc-1"), subnets(&["10.0.1.0/24"]), None)
        .expect("stage");

    // A Git change dated before the last file sync is not concurrent.
    env.write_repo(path, &vpc_manifest("vpc-1", &["10.0.2.0/24"]), HOUR / 2);

    let report = orch.sync_bidirectional().await.expect("sync");
    assert!(report.conflicts.is_empty(), "{report:?}");
    assert_eq!(report.synced.len(), 1, "{report:?}");
    assert_eq!(report.synced[0].key, vpc("vpc-1"));
    assert!(report.unchanged.is_empty());
    assert!(env.read_repo(path).contains("10.0.1.0/24"));

    let op = store::last_operation_at(env.home.path(), &env.fabric)
        .expect("ops")
        .expect("op");
    assert_eq!(op.summary.synced, 1);
}

/// Draft edited at T+1, Git edited externally afterwards: the push must flag
/// the conflict and leave `desired_spec` alone.
fn conflicted_env() -> (Env, Orchestrator, String) {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-2.yaml", &vpc_manifest("vpc-2", &["10.0.2.0/24"]), HOUR);
    let orch = env.orchestrator();
    (env, orch, "managed/vpcs/vpc-2.yaml".to_string())
}

async fn make_conflict(env: &Env, orch: &Orchestrator, path: &str) {
    orch.sync_github_to_gui().await.expect("pull");
    tokio::time::sleep(Duration::from_millis(5)).await;
    orch.stage_draft(&vpc("vpc-2"), subnets(&["10.0.20.0/24"]), None)
        .expect("stage");

    let external = env.repo.path().join(path);
    fs::write(&external, vpc_manifest("vpc-2", &["10.0.22.0/24"])).expect("external edit");
    set_mtime(&external, SystemTime::now() + Duration::from_secs(60));
}

#[tokio::test]
async fn concurrent_edits_are_flagged_not_overwritten() {
    let (env, orch, path) = conflicted_env();
    make_conflict(&env, &orch, &path).await;

    let report = orch.sync_gui_to_github().await.expect("push");
    assert!(report.synced.is_empty());
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].key, vpc("vpc-2"));

    let row = env.row(&vpc("vpc-2"));
    assert_eq!(row.conflict_status(), ConflictStatus::Detected);
    assert_eq!(row.desired_spec(), Some(&subnets(&["10.0.2.0/24"])));
    assert_eq!(row.draft_spec(), Some(&subnets(&["10.0.20.0/24"])));
    assert!(env.read_repo(&path).contains("10.0.22.0/24"), "Git edit survives");

    let op = store::last_operation_at(env.home.path(), &env.fabric)
        .expect("ops")
        .expect("op");
    assert_eq!(op.state, OperationState::ConflictDetected);
    assert_eq!(op.summary.skipped_conflict, 1);

    let again = orch.sync_bidirectional().await.expect("bidirectional");
    assert!(again.synced.is_empty(), "conflicted resource is excluded: {again:?}");
    assert!(again
        .skipped
        .iter()
        .any(|s| s.key == vpc("vpc-2") && s.reason == SkipReason::ConflictPending));
    assert_eq!(env.row(&vpc("vpc-2")).conflict_status(), ConflictStatus::Detected);
}

#[tokio::test]
async fn bidirectional_pull_then_push_detects_conflict() {
    let (env, orch, path) = conflicted_env();
    make_conflict(&env, &orch, &path).await;

    let report = orch.sync_bidirectional().await.expect("sync");
    assert_eq!(report.conflicts.len(), 1);
    let row = env.row(&vpc("vpc-2"));
    assert_eq!(row.conflict_status(), ConflictStatus::Detected);
    assert!(env.read_repo(&path).contains("10.0.22.0/24"));
}

#[tokio::test]
async fn prefer_git_discards_the_draft() {
    let (env, orch, path) = conflicted_env();
    make_conflict(&env, &orch, &path).await;
    orch.sync_gui_to_github().await.expect("push");

    let row = orch
        .resolve_conflict(&vpc("vpc-2"), ResolutionPolicy::PreferGit)
        .await
        .expect("resolve");
    assert_eq!(row.conflict_status(), ConflictStatus::Resolved);
    assert!(row.draft_spec().is_none());
    assert_eq!(row.desired_spec(), Some(&subnets(&["10.0.22.0/24"])));

    let report = orch.sync_bidirectional().await.expect("sync");
    assert!(report.synced.is_empty());
    assert!(report.conflicts.is_empty());
    assert!(env.read_repo(&path).contains("10.0.22.0/24"));
}

#[tokio::test]
async fn prefer_gui_overwrites_git_on_next_push() {
    let (env, orch, path) = conflicted_env();
    make_conflict(&env, &orch, &path).await;
    orch.sync_gui_to_github().await.expect("push");

    orch.resolve_conflict(&vpc("vpc-2"), ResolutionPolicy::PreferGui)
        .await
        .expect("resolve");
    let report = orch.sync_gui_to_github().await.expect("push");
    assert_eq!(report.synced.len(), 1, "{report:?}");

    let row = env.row(&vpc("vpc-2"));
    assert_eq!(row.conflict_status(), ConflictStatus::None);
    assert_eq!(row.desired_spec(), Some(&subnets(&["10.0.20.0/24"])));
    assert!(env.read_repo(&path).contains("10.0.20.0/24"));
}

#[tokio::test]
async fn merge_pushes_the_operator_document() {
    let (env, orch, path) = conflicted_env();
    make_conflict(&env, &orch, &path).await;
    orch.sync_gui_to_github().await.expect("push");

    let merged = subnets(&["10.0.20.0/24", "10.0.22.0/24"]);
    orch.resolve_conflict(&vpc("vpc-2"), ResolutionPolicy::Merge(merged.clone()))
        .await
        .expect("resolve");
    orch.sync_gui_to_github().await.expect("push");

    let row = env.row(&vpc("vpc-2"));
    assert_eq!(row.desired_spec(), Some(&merged));
    let content = env.read_repo(&path);
    assert!(content.contains("10.0.20.0/24") && content.contains("10.0.22.0/24"));
}

#[tokio::test]
async fn resolving_a_clean_resource_is_rejected() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");

    let err = orch
        .resolve_conflict(&vpc("vpc-1"), ResolutionPolicy::PreferGit)
        .await
        .expect_err("nothing to resolve");
    assert!(err.to_string().contains("no conflict"));
    assert!(store::read_lock_at(env.home.path(), &env.fabric)
        .expect("lock")
        .is_none());
}

// ---------------------------------------------------------------------------
// Cluster and drift
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observation_reports_drift() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    let pull = orch.sync_github_to_gui().await.expect("pull");
    assert_eq!(pull.drift[0].status, DriftStatus::Unknown, "not observed yet");

    let cluster = StaticCluster::new();
    cluster.insert(vpc("vpc-1"), subnets(&["10.0.0.0/24"]));
    let observed = orch.observe_cluster(&cluster).await.expect("observe");
    assert_eq!(observed.observed, 1);
    assert_eq!(observed.drift[0].status, DriftStatus::InSync);

    cluster.insert(vpc("vpc-1"), subnets(&["10.0.0.0/24", "10.0.1.0/24"]));
    let observed = orch.observe_cluster(&cluster).await.expect("observe");
    assert_eq!(observed.changed, vec![vpc("vpc-1")]);
    let drift = &observed.drift[0];
    assert_eq!(drift.status, DriftStatus::Drifted);
    assert_eq!(drift.diffs.len(), 1);
    assert_eq!(drift.diffs[0].path, "subnets[1]");
    assert!(matches!(drift.diffs[0].change, FieldChange::Added { .. }));

    let row = env.row(&vpc("vpc-1"));
    assert!(row.actual_observed_at().is_some());
}

// ---------------------------------------------------------------------------
// Fabric deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_fabric_cascades_and_removes_files() {
    let env = Env::new();
    env.write_repo("managed/vpcs/vpc-1.yaml", &vpc_manifest("vpc-1", &["10.0.0.0/24"]), HOUR);
    let orch = env.orchestrator();
    orch.sync_github_to_gui().await.expect("pull");

    let report = orch.delete_fabric(true).await.expect("delete");
    assert_eq!(report.resources, 1);
    assert_eq!(report.removed_files, vec!["managed/vpcs/vpc-1.yaml".to_string()]);
    assert!(!env.repo.path().join("managed/vpcs/vpc-1.yaml").exists());
    assert!(store::load_fabric_at(env.home.path(), &env.fabric).is_err());
    assert!(store::list_fabrics_at(env.home.path()).expect("list").is_empty());
}
