use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use fabricsync_core::config::load_config_at;
use fabricsync_core::store;
use fabricsync_core::types::{FabricName, RepositorySource, ResourceKey, SyncDirection};
use fabricsync_detector::is_manifest_file;
use fabricsync_sync::pipeline::{self, FabricRun, SyncScope};
use fabricsync_sync::status::all_status;
use fabricsync_sync::{CancellationFlag, Orchestrator, SyncReport};

use crate::cluster::observe_fabric;
use crate::error::{io_err, DaemonError};
use crate::paths::{fabrics_root, logs_dir, run_dir, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Last successful sync and cluster observation per fabric.
#[derive(Debug, Default)]
struct Activity {
    last_sync: HashMap<String, DateTime<Utc>>,
    last_observed: HashMap<String, DateTime<Utc>>,
}

type SharedActivity = Arc<RwLock<Activity>>;

#[derive(Debug, Clone, PartialEq)]
enum SyncTarget {
    All,
    Fabric(String),
}

impl SyncTarget {
    fn scope(&self) -> SyncScope {
        match self {
            SyncTarget::All => SyncScope::All,
            SyncTarget::Fabric(name) => SyncScope::Fabric(FabricName::from(name.as_str())),
        }
    }

    fn label(&self) -> String {
        match self {
            SyncTarget::All => "all".to_string(),
            SyncTarget::Fabric(name) => name.clone(),
        }
    }
}

struct SyncJob {
    target: SyncTarget,
    /// `None` uses each fabric's default direction.
    direction: Option<SyncDirection>,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, String>>,
}

/// Per-fabric result inside a [`SyncSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct FabricOutcome {
    pub fabric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub target: String,
    pub source: String,
    pub fabrics: Vec<FabricOutcome>,
    pub synced: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub duration_ms: u128,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = load_config_at(&home)?;

    let activity: SharedActivity = Arc::default();
    let cancel = CancellationFlag::new();
    let started_at = Utc::now();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        home = %home.display(),
        schedule_secs = config.schedule.interval_secs,
        cluster_poll_secs = config.cluster.poll_interval_secs,
        "daemon starting"
    );

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let sync_tx = sync_tx.clone();
        let schedule = config.schedule.clone();
        tokio::spawn(async move {
            let result =
                scheduler_task(schedule.interval(), schedule.direction, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let sync_tx = sync_tx.clone();
        let debounce = Duration::from_millis(config.watch.debounce_ms);
        tokio::spawn(async move {
            let result = watcher_task(home, debounce, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let activity = activity.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(home, activity, cancel, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let poller_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let activity = activity.clone();
        let cancel = cancel.clone();
        let interval = config.cluster.interval();
        tokio::spawn(async move {
            let result = cluster_poll_task(home, interval, activity, cancel, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let activity = activity.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                activity,
                sync_tx,
                shutdown.clone(),
                shutdown_rx,
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(sync_tx);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            };
            // A sync still running stops at its next checkpoint.
            cancel.cancel();
            result
        })
    };

    let (scheduler, watcher, processor, poller, socket, signal) = tokio::join!(
        scheduler_handle,
        watcher_handle,
        processor_handle,
        poller_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler)?;
    handle_join("watcher", watcher)?;
    handle_join("sync_processor", processor)?;
    handle_join("cluster_poller", poller)?;
    handle_join("socket_server", socket)?;
    handle_join("signal_handler", signal)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn scheduler_task(
    interval: Option<Duration>,
    direction: SyncDirection,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(period) = interval else {
        tracing::info!("scheduled sync disabled");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_sync(&sync_tx, SyncTarget::All, Some(direction), "scheduler").await {
                    Ok(summary) => tracing::info!(
                        fabrics = summary.fabrics.len(),
                        synced = summary.synced,
                        conflicts = summary.conflicts,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "scheduled sync completed",
                    ),
                    Err(err) => tracing::error!(error = %err, "scheduled sync failed"),
                }
            }
        }
    }
    Ok(())
}

/// A local repository the watcher maps back to its fabric.
#[derive(Debug, Clone)]
struct WatchedRepo {
    fabric: String,
    root: PathBuf,
    /// Managed and raw directories.
    dirs: Vec<PathBuf>,
}

async fn watcher_task(
    home: PathBuf,
    debounce_window: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let fabrics_dir = fabrics_root(&home);
    if !fabrics_dir.exists() {
        fs::create_dir_all(&fabrics_dir).map_err(|e| io_err(&fabrics_dir, e))?;
    }
    // FSEvents reports real paths (/private/var/... on macOS).
    let fabrics_dir = fs::canonicalize(&fabrics_dir).unwrap_or(fabrics_dir);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&fabrics_dir, RecursiveMode::Recursive)?;

    let mut watched = HashSet::new();
    let mut repos = load_watched_repos(&home)?;
    register_repos(&mut watcher, &mut watched, &repos)?;

    let mut debounce = HashMap::<String, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                let mut targets: Vec<String> = Vec::new();
                for path in &event.paths {
                    if is_fabric_record(path, &fabrics_dir) {
                        match load_watched_repos(&home) {
                            Ok(fresh) => {
                                repos = fresh;
                                register_repos(&mut watcher, &mut watched, &repos)?;
                            }
                            Err(err) => tracing::warn!(error = %err, "cannot reload fabrics"),
                        }
                        continue;
                    }
                    if let Some(fabric) = fabric_for_path(&repos, path) {
                        if !targets.contains(&fabric) {
                            targets.push(fabric);
                        }
                    }
                }

                for fabric in targets {
                    if !should_process_event(&mut debounce, &fabric, Instant::now(), debounce_window) {
                        continue;
                    }
                    let target = SyncTarget::Fabric(fabric.clone());
                    match enqueue_sync(&sync_tx, target, Some(SyncDirection::GithubToGui), "watcher").await {
                        Ok(summary) => tracing::info!(
                            fabric = %fabric,
                            synced = summary.synced,
                            unchanged = summary.unchanged,
                            duration_ms = summary.duration_ms,
                            "watcher-triggered sync completed",
                        ),
                        Err(err) => tracing::warn!(fabric = %fabric, error = %err, "watcher-triggered sync failed"),
                    }
                }
            }
        }
    }

    Ok(())
}

async fn sync_processor_task(
    home: PathBuf,
    activity: SharedActivity,
    cancel: CancellationFlag,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let outcome = match pipeline::run(
                    &home,
                    job.target.scope(),
                    job.direction,
                    job.source,
                    &cancel,
                )
                .await
                {
                    Ok(runs) => {
                        record_syncs(&activity, &runs).await;
                        build_sync_summary(&job.target, job.source, runs, started.elapsed())
                    }
                    Err(err) => Err(err.to_string()),
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn cluster_poll_task(
    home: PathBuf,
    interval: Option<Duration>,
    activity: SharedActivity,
    cancel: CancellationFlag,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(period) = interval else {
        tracing::info!("cluster polling disabled");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => observe_all(&home, &activity, &cancel).await,
        }
    }
    Ok(())
}

async fn observe_all(home: &Path, activity: &SharedActivity, cancel: &CancellationFlag) {
    let fabrics = match store::list_fabrics_at(home) {
        Ok(fabrics) => fabrics,
        Err(err) => {
            tracing::warn!(error = %err, "cannot list fabrics for observation");
            return;
        }
    };
    for fabric in fabrics.iter().filter(|f| f.cluster.is_some()) {
        match observe_fabric(home, fabric, cancel).await {
            Ok(Some(_)) => {
                activity
                    .write()
                    .await
                    .last_observed
                    .insert(fabric.name.0.clone(), Utc::now());
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(fabric = %fabric.name, error = %err, "cluster observation failed")
            }
        }
    }
}

async fn socket_server_task(
    home: PathBuf,
    activity: SharedActivity,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let activity = activity.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        activity,
                        sync_tx,
                        shutdown_tx,
                        started_at,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    activity: SharedActivity,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&home, &activity, started_at).await),
            "sync" => {
                let target = match request.fabric.clone() {
                    Some(fabric) => SyncTarget::Fabric(fabric),
                    None => SyncTarget::All,
                };
                match enqueue_sync(&sync_tx, target, request.direction, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(error_message(err)),
                }
            }
            "resolve" => match resolve_request(&home, &request).await {
                Ok(data) => DaemonResponse::ok(data),
                Err(err) => DaemonResponse::error(error_message(err)),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn resolve_request(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    let fabric = request
        .fabric
        .as_deref()
        .ok_or_else(|| DaemonError::Protocol("resolve requires 'fabric'".to_string()))?;
    let resource = request
        .resource
        .as_deref()
        .ok_or_else(|| DaemonError::Protocol("resolve requires 'resource'".to_string()))?;
    let policy = request
        .policy
        .clone()
        .ok_or_else(|| DaemonError::Protocol("resolve requires 'policy'".to_string()))?;
    let key = ResourceKey::from_str(resource).map_err(DaemonError::Protocol)?;

    let orchestrator = Orchestrator::open(home, &FabricName::from(fabric))?.with_source("socket");
    let row = orchestrator.resolve_conflict(&key, policy.into()).await?;
    Ok(json!({
        "fabric": fabric,
        "resource": key.to_string(),
        "conflict_status": row.conflict_status(),
        "pending_draft": row.has_pending_draft(),
        "version": row.version(),
    }))
}

async fn build_status_payload(
    home: &Path,
    activity: &SharedActivity,
    started_at: DateTime<Utc>,
) -> Value {
    let (last_sync, last_observed) = {
        let activity = activity.read().await;
        (activity.last_sync.clone(), activity.last_observed.clone())
    };

    let fabrics: Vec<Value> = match all_status(home) {
        Ok(statuses) => statuses
            .into_iter()
            .map(|status| {
                let name = status.fabric.0.clone();
                json!({
                    "name": name,
                    "repository": status.repository,
                    "counts": status.counts,
                    "lock_holder": status.lock_holder,
                    "last_operation_state": status.last_operation.as_ref().map(|op| op.state),
                    "last_sync_at": last_sync.get(&name),
                    "last_observed_at": last_observed.get(&name),
                })
            })
            .collect(),
        Err(err) => {
            tracing::warn!(error = %err, "cannot build fabric status");
            Vec::new()
        }
    };

    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "pid": std::process::id(),
        "started_at": started_at,
        "last_sync_at": last_sync.values().max(),
        "fabrics": fabrics,
        "socket": socket_path(home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    target: SyncTarget,
    direction: Option<SyncDirection>,
    source: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            target,
            direction,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

/// Protocol errors already carry the sync error text; skip the prefix.
fn error_message(err: DaemonError) -> String {
    match err {
        DaemonError::Protocol(message) => message,
        other => other.to_string(),
    }
}

async fn record_syncs(activity: &SharedActivity, runs: &[FabricRun]) {
    let now = Utc::now();
    let mut activity = activity.write().await;
    for run in runs {
        if let Ok(report) = &run.outcome {
            if !report.cancelled {
                activity.last_sync.insert(run.fabric.0.clone(), now);
            }
        }
    }
}

/// A single-fabric run that failed becomes an error response; `All` reports
/// failures per fabric.
fn build_sync_summary(
    target: &SyncTarget,
    source: &'static str,
    runs: Vec<FabricRun>,
    duration: Duration,
) -> Result<SyncSummary, String> {
    if let (SyncTarget::Fabric(_), [FabricRun { outcome: Err(err), .. }]) = (target, runs.as_slice()) {
        return Err(err.to_string());
    }

    let mut summary = SyncSummary {
        target: target.label(),
        source: source.to_string(),
        fabrics: Vec::with_capacity(runs.len()),
        synced: 0,
        unchanged: 0,
        conflicts: 0,
        failed: 0,
        duration_ms: duration.as_millis(),
    };
    for run in runs {
        let fabric = run.fabric.0;
        match run.outcome {
            Ok(report) => {
                summary.synced += report.synced.len();
                summary.unchanged += report.unchanged.len();
                summary.conflicts += report.conflicts.len();
                summary.failed += report.failed.len();
                summary.fabrics.push(FabricOutcome {
                    fabric,
                    report: Some(report),
                    error: None,
                });
            }
            Err(err) => summary.fabrics.push(FabricOutcome {
                fabric,
                report: None,
                error: Some(err.to_string()),
            }),
        }
    }
    Ok(summary)
}

fn load_watched_repos(home: &Path) -> Result<Vec<WatchedRepo>, DaemonError> {
    let mut repos = Vec::new();
    for fabric in store::list_fabrics_at(home)? {
        let RepositorySource::Local { path } = &fabric.repository.source else {
            continue;
        };
        let root = match fs::canonicalize(path) {
            Ok(root) => root,
            Err(err) => {
                tracing::warn!(fabric = %fabric.name, path = %path.display(), error = %err, "repository not watchable");
                continue;
            }
        };
        let dirs = [&fabric.repository.managed_dir, &fabric.repository.raw_dir]
            .into_iter()
            .map(|dir| root.join(dir))
            .collect();
        repos.push(WatchedRepo {
            fabric: fabric.name.0.clone(),
            root,
            dirs,
        });
    }
    Ok(repos)
}

fn register_repos(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    repos: &[WatchedRepo],
) -> Result<(), DaemonError> {
    for repo in repos {
        if watched.insert(repo.root.clone()) {
            watcher.watch(&repo.root, RecursiveMode::Recursive)?;
            tracing::debug!(fabric = %repo.fabric, path = %repo.root.display(), "watching repository");
        }
    }
    Ok(())
}

fn fabric_for_path(repos: &[WatchedRepo], path: &Path) -> Option<String> {
    if !is_manifest_file(path) {
        return None;
    }
    repos
        .iter()
        .find(|repo| repo.dirs.iter().any(|dir| path.starts_with(dir)))
        .map(|repo| repo.fabric.clone())
}

fn is_fabric_record(path: &Path, fabrics_dir: &Path) -> bool {
    path.starts_with(fabrics_dir)
        && path.file_name().and_then(|name| name.to_str()) == Some("fabric.yaml")
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn should_process_event(
    debounce: &mut HashMap<String, Instant>,
    fabric: &str,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(fabric) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(fabric.to_string(), now);
            true
        }
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [fabrics_root(home), run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use fabricsync_core::types::{OperationId, RepositoryConfig};
    use fabricsync_sync::SyncError;
    use tempfile::TempDir;
    use tokio::time::advance;

    fn local_fabric(home: &Path, name: &str, repo: &Path) {
        store::init_fabric_at(
            home,
            FabricName::from(name),
            RepositoryConfig::new(RepositorySource::Local {
                path: repo.to_path_buf(),
            }),
            None,
            SyncDirection::Bidirectional,
        )
        .unwrap();
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<String, Instant>::new();
        let mut sync_triggers = 0usize;

        for _ in 0..5 {
            if should_process_event(&mut debounce, "lab", Instant::now(), threshold) {
                sync_triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(sync_triggers, 1, "rapid saves should collapse to one sync trigger");

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event(&mut debounce, "lab", Instant::now(), threshold));
        assert!(should_process_event(&mut debounce, "other", Instant::now(), threshold));
    }

    #[test]
    fn events_map_to_the_owning_fabric() {
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        local_fabric(home.path(), "lab", repo.path());

        let repos = load_watched_repos(home.path()).unwrap();
        assert_eq!(repos.len(), 1);
        let root = &repos[0].root;

        let managed = root.join("managed/vpcs/vpc-1.yaml");
        let raw = root.join("raw/batch.yml");
        assert_eq!(fabric_for_path(&repos, &managed).as_deref(), Some("lab"));
        assert_eq!(fabric_for_path(&repos, &raw).as_deref(), Some("lab"));
        assert_eq!(fabric_for_path(&repos, &root.join("managed/vpcs/vpc-1.yaml.tmp")), None);
        assert_eq!(fabric_for_path(&repos, &root.join("README.yaml")), None);
        assert_eq!(fabric_for_path(&repos, Path::new("/elsewhere/managed/x.yaml")), None);
    }

    #[test]
    fn github_fabrics_are_not_watched() {
        let home = TempDir::new().unwrap();
        store::init_fabric_at(
            home.path(),
            FabricName::from("remote"),
            RepositoryConfig::new(RepositorySource::GitHub {
                owner: "acme".into(),
                repo: "fabric".into(),
                branch: "main".into(),
                token_env: "GITHUB_TOKEN".into(),
            }),
            None,
            SyncDirection::Bidirectional,
        )
        .unwrap();
        assert!(load_watched_repos(home.path()).unwrap().is_empty());
    }

    #[test]
    fn fabric_records_are_recognised() {
        let fabrics = Path::new("/home/op/.fabricsync/fabrics");
        assert!(is_fabric_record(&fabrics.join("lab/fabric.yaml"), fabrics));
        assert!(!is_fabric_record(
            &fabrics.join("lab/resources/VPC/default/vpc-1.yaml"),
            fabrics
        ));
    }

    #[test]
    fn single_fabric_failure_becomes_an_error() {
        let runs = vec![FabricRun {
            fabric: FabricName::from("lab"),
            outcome: Err(SyncError::LockContention {
                fabric: "lab".into(),
                holder: "cli".into(),
            }),
        }];
        let err = build_sync_summary(
            &SyncTarget::Fabric("lab".into()),
            "socket",
            runs,
            Duration::from_millis(3),
        )
        .unwrap_err();
        assert!(err.contains("already in progress"));
    }

    #[test]
    fn all_scope_reports_failures_per_fabric() {
        let ok = SyncReport::new(
            OperationId::from("op-1"),
            FabricName::from("east"),
            SyncDirection::Bidirectional,
        );
        let runs = vec![
            FabricRun {
                fabric: FabricName::from("east"),
                outcome: Ok(ok),
            },
            FabricRun {
                fabric: FabricName::from("west"),
                outcome: Err(SyncError::LockContention {
                    fabric: "west".into(),
                    holder: "cli".into(),
                }),
            },
        ];
        let summary =
            build_sync_summary(&SyncTarget::All, "scheduler", runs, Duration::ZERO).unwrap();
        assert_eq!(summary.target, "all");
        assert_eq!(summary.fabrics.len(), 2);
        assert!(summary.fabrics[0].error.is_none());
        assert!(summary.fabrics[1]
            .error
            .as_deref()
            .unwrap()
            .contains("already in progress"));
    }

    #[tokio::test]
    async fn status_payload_lists_fabrics_and_activity() {
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        local_fabric(home.path(), "lab", repo.path());

        let activity: SharedActivity = Arc::default();
        let synced_at = Utc::now();
        activity
            .write()
            .await
            .last_sync
            .insert("lab".to_string(), synced_at);

        let payload = build_status_payload(home.path(), &activity, synced_at).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["label"], json!(DAEMON_LABEL));
        assert_eq!(payload["last_sync_at"], json!(synced_at));
        let fabrics = payload["fabrics"].as_array().unwrap();
        assert_eq!(fabrics.len(), 1);
        assert_eq!(fabrics[0]["name"], json!("lab"));
        assert_eq!(fabrics[0]["counts"]["total"], json!(0));
        assert!(fabrics[0]["last_observed_at"].is_null());
    }

    #[tokio::test]
    async fn status_payload_without_fabrics() {
        let home = TempDir::new().unwrap();
        let payload = build_status_payload(home.path(), &Arc::default(), Utc::now()).await;
        assert!(payload["fabrics"].as_array().unwrap().is_empty());
        assert!(payload["last_sync_at"].is_null());
    }

    #[tokio::test]
    async fn resolve_requires_all_fields() {
        let home = TempDir::new().unwrap();
        let err = resolve_request(
            home.path(),
            &DaemonRequest {
                fabric: Some("lab".into()),
                ..DaemonRequest::new("resolve")
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("requires 'resource'"));
    }
}
