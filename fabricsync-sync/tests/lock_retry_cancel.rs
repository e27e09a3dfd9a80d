use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

use fabricsync_core::store;
use fabricsync_core::types::{
    Fabric, FabricName, OperationState, RepositoryConfig, RepositorySource, ResourceKey,
    SyncDirection,
};
use fabricsync_sync::git::{CommitInfo, RemoteEntry, RemoteFile};
use fabricsync_sync::{
    CancellationFlag, GitError, GitHost, LocalRepository, Orchestrator, RetryPolicy, SyncError,
};

fn init(home: &TempDir, repo: &TempDir) -> Fabric {
    store::init_fabric_at(
        home.path(),
        FabricName::from("lab"),
        RepositoryConfig::new(RepositorySource::Local {
            path: repo.path().to_path_buf(),
        }),
        None,
        SyncDirection::Bidirectional,
    )
    .expect("init fabric")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
    }
}

/// Wraps a [`LocalRepository`] and lets a test intercept individual calls.
struct ScriptedHost {
    inner: LocalRepository,
    /// Block the first `list_dir` until `gate` is notified.
    hold_first_list: AtomicBool,
    entered: Notify,
    gate: Notify,
    /// Every `list_dir` fails transiently.
    flaky_list: bool,
    list_calls: AtomicU32,
    /// Cancelled after the first successful write.
    cancel_after_write: Option<CancellationFlag>,
}

impl ScriptedHost {
    fn new(repo: &TempDir) -> Self {
        Self {
            inner: LocalRepository::new(repo.path().to_path_buf()),
            hold_first_list: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Notify::new(),
            flaky_list: false,
            list_calls: AtomicU32::new(0),
            cancel_after_write: None,
        }
    }
}

#[async_trait]
impl GitHost for ScriptedHost {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, GitError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_first_list.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.flaky_list {
            return Err(GitError::Transient("502 Bad Gateway".into()));
        }
        self.inner.list_dir(dir).await
    }

    async fn read_file(&self, path: &str) -> Result<RemoteFile, GitError> {
        self.inner.read_file(path).await
    }

    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, GitError> {
        self.inner.last_modified(path).await
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<CommitInfo, GitError> {
        let info = self
            .inner
            .write_file(path, content, message, expected_hash)
            .await?;
        if let Some(flag) = &self.cancel_after_write {
            flag.cancel();
        }
        Ok(info)
    }

    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), GitError> {
        self.inner.delete_file(path, message, expected_hash).await
    }
}

#[tokio::test]
async fn concurrent_trigger_observes_lock_contention() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let fabric = init(&home, &repo);

    let host = Arc::new(ScriptedHost::new(&repo));
    host.hold_first_list.store(true, Ordering::SeqCst);
    let orch = Arc::new(
        Orchestrator::with_host(home.path(), fabric, host.clone()).expect("orchestrator"),
    );

    let running = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.sync_github_to_gui().await })
    };
    host.entered.notified().await;

    let lock = store::read_lock_at(home.path(), &FabricName::from("lab"))
        .expect("read lock")
        .expect("lock held while running");
    assert_eq!(lock.holder, "cli");

    let second = Orchestrator::with_host(
        home.path(),
        store::load_fabric_at(home.path(), &FabricName::from("lab")).expect("fabric"),
        host.clone(),
    )
    .expect("orchestrator")
    .with_source("scheduler");
    let err = second
        .sync_bidirectional()
        .await
        .expect_err("second trigger must not run");
    assert!(matches!(err, SyncError::LockContention { .. }), "{err:?}");
    assert!(err.to_string().contains("already in progress"));

    host.gate.notify_one();
    running
        .await
        .expect("join")
        .expect("first sync completes");

    assert!(store::read_lock_at(home.path(), &FabricName::from("lab"))
        .expect("read lock")
        .is_none());
    let ops = store::list_operations_at(home.path(), &FabricName::from("lab")).expect("ops");
    assert_eq!(ops.len(), 1, "the rejected trigger never became an operation");
    assert_eq!(ops[0].state, OperationState::Succeeded);
}

#[tokio::test]
async fn retry_exhaustion_fails_the_operation_and_releases_the_lock() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let fabric = init(&home, &repo);

    let mut scripted = ScriptedHost::new(&repo);
    scripted.flaky_list = true;
    let host = Arc::new(scripted);
    let orch = Orchestrator::with_host(home.path(), fabric, host.clone())
        .expect("orchestrator")
        .with_retry(fast_retry());

    let err = orch.sync_github_to_gui().await.expect_err("must fail");
    match &err {
        SyncError::Aborted { reason, partial, .. } => {
            assert!(reason.contains("gave up after 3 attempts"), "{reason}");
            assert!(partial.synced.is_empty());
        }
        other => panic!("expected aborted, got {other:?}"),
    }
    assert_eq!(host.list_calls.load(Ordering::SeqCst), 3);

    let lab = FabricName::from("lab");
    assert!(store::read_lock_at(home.path(), &lab).expect("lock").is_none());
    let op = store::last_operation_at(home.path(), &lab)
        .expect("ops")
        .expect("op");
    assert_eq!(op.state, OperationState::Failed);
    assert!(op.error.as_deref().unwrap_or_default().contains("transient"));

    // A later attempt is not blocked by the failed one.
    let healthy = Orchestrator::with_host(
        home.path(),
        store::load_fabric_at(home.path(), &lab).expect("fabric"),
        Arc::new(LocalRepository::new(repo.path().to_path_buf())),
    )
    .expect("orchestrator");
    healthy.sync_github_to_gui().await.expect("next sync runs");
}

#[tokio::test]
async fn auth_failure_aborts_without_retry() {
    struct Rejecting;

    #[async_trait]
    impl GitHost for Rejecting {
        fn describe(&self) -> String {
            "rejecting".into()
        }
        async fn list_dir(&self, _dir: &str) -> Result<Vec<RemoteEntry>, GitError> {
            Err(GitError::Auth("bad credentials".into()))
        }
        async fn read_file(&self, path: &str) -> Result<RemoteFile, GitError> {
            Err(GitError::NotFound { path: path.into() })
        }
        async fn last_modified(&self, _path: &str) -> Result<Option<DateTime<Utc>>, GitError> {
            Ok(None)
        }
        async fn write_file(
            &self,
            _path: &str,
            _content: &str,
            _message: &str,
            _expected_hash: Option<&str>,
        ) -> Result<CommitInfo, GitError> {
            Err(GitError::Auth("bad credentials".into()))
        }
        async fn delete_file(
            &self,
            _path: &str,
            _message: &str,
            _expected_hash: Option<&str>,
        ) -> Result<(), GitError> {
            Err(GitError::Auth("bad credentials".into()))
        }
    }

    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let fabric = init(&home, &repo);
    let orch = Orchestrator::with_host(home.path(), fabric, Arc::new(Rejecting))
        .expect("orchestrator")
        .with_retry(fast_retry());

    let err = orch.sync_bidirectional().await.expect_err("auth failure aborts");
    assert!(err.to_string().contains("authentication failed"));
    assert!(store::read_lock_at(home.path(), &FabricName::from("lab"))
        .expect("lock")
        .is_none());
}

#[tokio::test]
async fn cancellation_reports_partial_completion() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let fabric = init(&home, &repo);

    let flag = CancellationFlag::new();
    let mut scripted = ScriptedHost::new(&repo);
    scripted.cancel_after_write = Some(flag.clone());
    let orch = Orchestrator::with_host(home.path(), fabric, Arc::new(scripted))
        .expect("orchestrator")
        .with_cancellation(flag.clone());

    for name in ["vpc-1", "vpc-2", "vpc-3"] {
        orch.create_resource(
            ResourceKey::new("VPC", "default", name),
            "vpc.githedgehog.com/v1beta1",
            json!({"subnets": []}).as_object().cloned().expect("object"),
        )
        .expect("create");
    }

    let report = orch.sync_gui_to_github().await.expect("cancelled run still reports");
    assert!(report.cancelled);
    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.synced[0].key.name, "vpc-1");

    let lab = FabricName::from("lab");
    let op = store::last_operation_at(home.path(), &lab)
        .expect("ops")
        .expect("op");
    assert_eq!(op.state, OperationState::Cancelled);
    assert_eq!(op.summary.synced, 1);
    assert!(store::read_lock_at(home.path(), &lab).expect("lock").is_none());

    let pending = store::list_resources_at(home.path(), &lab)
        .expect("rows")
        .into_iter()
        .filter(|r| r.has_pending_draft())
        .count();
    assert_eq!(pending, 2, "untouched drafts stay pending");
    assert!(!repo.path().join("managed/vpcs/vpc-2.yaml").exists());
    assert!(fs::read_to_string(repo.path().join("managed/vpcs/vpc-1.yaml"))
        .expect("vpc-1 committed")
        .contains("kind: VPC"));
}
