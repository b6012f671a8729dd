use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use tapsync_sync::{BatchOptions, BatchSummary, Scope, SyncError, Tap, TriggerEvent};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

#[derive(Debug, Clone)]
enum JobKind {
    Check { dry_run: bool },
    Trigger { event: TriggerEvent, dry_run: bool },
}

impl JobKind {
    fn label(&self) -> String {
        match self {
            JobKind::Check { .. } => "all".to_string(),
            JobKind::Trigger { event, .. } => event.package.clone(),
        }
    }
}

struct Job {
    kind: JobKind,
    source: &'static str,
    respond_to: oneshot::Sender<Result<JobOutput, String>>,
}

/// What the processor hands back for one finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub run: RunRecord,
    pub result: Value,
}

/// Bookkeeping for the most recent batch, reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub target: String,
    pub source: String,
    pub finished_at_unix: u64,
    pub duration_ms: u128,
    #[serde(flatten)]
    pub summary: BatchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct DaemonState {
    home: PathBuf,
    tap: Tap,
    started_at_unix: u64,
    last_run: RwLock<Option<RunRecord>>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, tap: Tap) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), tap))
}

/// Run the daemon runtime: job processor, scheduler, socket server, signal handler.
pub async fn run(home: PathBuf, tap: Tap) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let interval = tap.config.schedule_interval();
    tracing::info!(
        tap = %tap.root.display(),
        interval_secs = interval.as_secs(),
        "starting tapsync daemon",
    );
    let state = Arc::new(DaemonState {
        home,
        tap,
        started_at_unix: unix_seconds_now(),
        last_run: RwLock::new(None),
    });

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = processor_task(state, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(state, job_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
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
            }
        })
    };

    let (processor_result, scheduler_result, socket_result, signal_result) = tokio::join!(
        processor_handle,
        scheduler_handle,
        socket_handle,
        signal_handle
    );

    handle_join("processor", processor_result)?;
    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn processor_task(
    state: Arc<DaemonState>,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let result = execute(&state.tap, &job.kind).await;

                let mut run = RunRecord {
                    target: job.kind.label(),
                    source: job.source.to_string(),
                    finished_at_unix: unix_seconds_now(),
                    duration_ms: started.elapsed().as_millis(),
                    summary: BatchSummary::default(),
                    error: None,
                };
                let outcome = match result {
                    Ok((summary, value)) => {
                        run.summary = summary;
                        Ok(JobOutput { run: run.clone(), result: value })
                    }
                    Err(err) => {
                        tracing::error!(package = %run.target, kind = %err.kind(), error = %err, "job failed");
                        run.error = Some(err.to_string());
                        Err(err.to_string())
                    }
                };
                *state.last_run.write().await = Some(run);

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn execute(tap: &Tap, kind: &JobKind) -> Result<(BatchSummary, Value), SyncError> {
    match kind {
        JobKind::Check { dry_run } => {
            let options = BatchOptions {
                dry_run: *dry_run,
                ..Default::default()
            };
            let report = tap.run_async(Scope::All, options).await?;
            let summary = report.summary();
            tracing::info!(
                updated = summary.updated,
                would_update = summary.would_update,
                up_to_date = summary.up_to_date,
                failed = summary.failed,
                "batch finished",
            );
            Ok((summary, serde_json::to_value(&report)?))
        }
        JobKind::Trigger { event, dry_run } => {
            let outcome = tap.trigger_async(event, *dry_run).await?;
            let summary = BatchSummary::from_outcomes([&outcome]);
            Ok((summary, serde_json::to_value(&outcome)?))
        }
    }
}

async fn scheduler_task(
    period: Duration,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the first scheduled run is one period out.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue(&job_tx, JobKind::Check { dry_run: false }, "schedule").await {
                    Ok(output) => tracing::info!(
                        updated = output.run.summary.updated,
                        failed = output.run.summary.failed,
                        duration_ms = output.run.duration_ms,
                        "scheduled check completed",
                    ),
                    Err(err) => tracing::error!(error = %err, "scheduled check failed"),
                }
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let (reader, writer) = stream.into_split();
                let state = state.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(reader, writer, state, job_tx, shutdown_tx).await {
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

async fn handle_client<R, W>(
    reader: R,
    mut writer: W,
    state: Arc<DaemonState>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
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
            "status" => DaemonResponse::ok(build_status_payload(&state).await),
            "check" => {
                let kind = JobKind::Check {
                    dry_run: request.dry_run,
                };
                job_response(enqueue(&job_tx, kind, "socket").await)
            }
            "trigger" => match request.event() {
                Some(event) => {
                    let kind = JobKind::Trigger {
                        event,
                        dry_run: request.dry_run,
                    };
                    job_response(enqueue(&job_tx, kind, "socket").await)
                }
                None => DaemonResponse::error("trigger requires a package"),
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

fn job_response(result: Result<JobOutput, DaemonError>) -> DaemonResponse {
    match result.and_then(|output| serde_json::to_value(output).map_err(DaemonError::from)) {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let last_run = state.last_run.read().await.clone();

    let tap = state.tap.clone();
    let recipes = match tokio::task::spawn_blocking(move || tap.status()).await {
        Ok(Ok(rows)) => json!(rows),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "status scan failed");
            json!({ "error": err.to_string() })
        }
        Err(err) => json!({ "error": format!("status scan join error: {err}") }),
    };

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "tap": state.tap.root.display().to_string(),
        "formula_dir": state.tap.formula_dir().display().to_string(),
        "socket": socket_path(&state.home).display().to_string(),
        "schedule_interval_secs": state.tap.config.schedule_interval_secs,
        "last_run": last_run,
        "recipes": recipes,
    })
}

async fn enqueue(
    job_tx: &mpsc::Sender<Job>,
    kind: JobKind,
    source: &'static str,
) -> Result<JobOutput, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(Job {
            kind,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("job queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("job response"))?;
    outcome.map_err(DaemonError::Protocol)
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
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &DaemonResponse) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
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

    use std::os::unix::net::UnixListener as StdUnixListener;

    use tapsync_core::TapConfig;
    use tapsync_sync::{StaticFetcher, StaticIndex};
    use tempfile::TempDir;

    const SHA: &str = "ad6d1a2c3b4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8";

    fn state(home: &TempDir, tap_dir: &TempDir) -> Arc<DaemonState> {
        let formula_dir = tap_dir.path().join("Formula");
        fs::create_dir_all(&formula_dir).expect("formula dir");
        fs::write(
            formula_dir.join("ossin.rb"),
            format!(
                "class Ossin < Formula\n  url \"https://files.example/ossin/ossin-0.1.1.tar.gz\"\n  sha256 \"{SHA}\"\nend\n"
            ),
        )
        .expect("recipe");
        let tap = Tap::with_upstream(
            tap_dir.path(),
            TapConfig::default(),
            Arc::new(StaticIndex::new().with_release("ossin", "0.1.1", None)),
            Arc::new(StaticFetcher::new()),
        );
        Arc::new(DaemonState {
            home: home.path().to_path_buf(),
            tap,
            started_at_unix: 1_000_000,
            last_run: RwLock::new(None),
        })
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn scheduler_enqueues_a_full_check_each_period() {
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let period = Duration::from_secs(3600);
        let started = Instant::now();

        let scheduler = tokio::spawn(scheduler_task(period, job_tx, shutdown_tx.subscribe()));

        for round in 1..=2u32 {
            let job = job_rx.recv().await.expect("scheduled job");
            assert_eq!(job.source, "schedule");
            assert!(matches!(job.kind, JobKind::Check { dry_run: false }));
            assert!(
                started.elapsed() >= period * round,
                "no run before the period elapses"
            );
            let run = RunRecord {
                target: job.kind.label(),
                source: job.source.to_string(),
                finished_at_unix: 0,
                duration_ms: 0,
                summary: BatchSummary::default(),
                error: None,
            };
            let _ = job.respond_to.send(Ok(JobOutput {
                run,
                result: Value::Null,
            }));
        }

        shutdown_tx.send(()).expect("shutdown");
        scheduler.await.expect("join").expect("scheduler result");
    }

    #[tokio::test]
    async fn unknown_and_incomplete_commands_are_rejected() {
        let home = TempDir::new().expect("home");
        let tap_dir = TempDir::new().expect("tap");
        let (job_tx, _job_rx) = mpsc::channel::<Job>(1);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mock = tokio_test::io::Builder::new()
            .read(b"{\"cmd\":\"bogus\"}\n")
            .write(b"{\"ok\":false,\"error\":\"unknown command 'bogus'\"}\n")
            .read(b"{\"cmd\":\"trigger\"}\n")
            .write(b"{\"ok\":false,\"error\":\"trigger requires a package\"}\n")
            .build();
        let (reader, writer) = tokio::io::split(mock);

        handle_client(reader, writer, state(&home, &tap_dir), job_tx, shutdown_tx)
            .await
            .expect("client");
    }

    #[tokio::test]
    async fn stop_command_broadcasts_shutdown_and_closes_client() {
        let home = TempDir::new().expect("home");
        let tap_dir = TempDir::new().expect("tap");
        let (job_tx, _job_rx) = mpsc::channel::<Job>(1);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let mock = tokio_test::io::Builder::new()
            .read(b"{\"cmd\":\"stop\"}\n")
            .write(b"{\"ok\":true,\"data\":{\"stopping\":true}}\n")
            .build();
        let (reader, writer) = tokio::io::split(mock);

        handle_client(reader, writer, state(&home, &tap_dir), job_tx, shutdown_tx)
            .await
            .expect("client");
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn trigger_runs_through_the_processor() {
        let home = TempDir::new().expect("home");
        let tap_dir = TempDir::new().expect("tap");
        let state = state(&home, &tap_dir);
        let (job_tx, job_rx) = mpsc::channel::<Job>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let processor = tokio::spawn(processor_task(
            state.clone(),
            job_rx,
            shutdown_tx.subscribe(),
        ));

        let event = TriggerEvent::new("ossin", None);
        let output = enqueue(&job_tx, JobKind::Trigger { event, dry_run: true }, "socket")
            .await
            .expect("job");
        assert_eq!(output.run.target, "ossin");
        assert_eq!(output.run.summary.up_to_date, 1);
        assert_eq!(output.result["status"], json!("no_update_needed"));

        let missing = TriggerEvent::new("ghost", None);
        let err = enqueue(&job_tx, JobKind::Trigger { event: missing, dry_run: true }, "socket")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg.contains("ghost")));

        let last = state.last_run.read().await.clone().expect("last run");
        assert_eq!(last.target, "ghost");
        assert!(last.error.is_some());

        shutdown_tx.send(()).expect("shutdown");
        processor.await.expect("join").expect("processor");
    }

    #[tokio::test]
    async fn status_payload_lists_recipes_and_last_run() {
        let home = TempDir::new().expect("home");
        let tap_dir = TempDir::new().expect("tap");
        let state = state(&home, &tap_dir);

        let payload = build_status_payload(&state).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_run"], Value::Null);
        assert_eq!(payload["recipes"][0]["name"], json!("ossin"));
        assert_eq!(payload["recipes"][0]["state"], json!("ok"));
        assert_eq!(payload["recipes"][0]["version"], json!("0.1.1"));
        assert_eq!(
            payload["schedule_interval_secs"],
            json!(TapConfig::default().schedule_interval_secs)
        );
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("tapsync.sock");
        drop(StdUnixListener::bind(&socket).expect("bind"));
        assert!(socket.exists(), "listener drop leaves the socket file behind");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[test]
    fn live_socket_is_not_stolen() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("tapsync.sock");
        let _listener = StdUnixListener::bind(&socket).expect("bind");

        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg.contains("already in use")));
        assert!(socket.exists());
    }
}
