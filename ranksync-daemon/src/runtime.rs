use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use ranksync_core::{Config, GuildId};

use crate::context::AppContext;
use crate::error::{io_err, DaemonError};
use crate::protocol::{
    manual_sync_payload, DaemonRequest, DaemonResponse, CMD_STATUS, CMD_STOP, CMD_SYNC,
};
use crate::scheduler::{
    enqueue_pass, pass_worker_task, unix_seconds_now, PassJob, SharedState, SyncTimer,
    TriggerSource,
};
use crate::telemetry::init_tracing;

const PASS_QUEUE_DEPTH: usize = 16;

/// Cloneable handle that stops a running [`App`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

/// The daemon: initialize → run → shutdown.
pub struct App {
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl App {
    /// Builds the remote clients from a validated config. Nothing is contacted
    /// until [`App::run`].
    pub fn initialize(config: Config) -> Self {
        Self::with_context(AppContext::from_config(config))
    }

    pub fn with_context(ctx: AppContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        Self { ctx, shutdown_tx }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Runs until shutdown is requested or a task fails.
    pub async fn run(self) -> Result<(), DaemonError> {
        let App { ctx, shutdown_tx } = self;
        let started_at_unix = unix_seconds_now();
        let state = SharedState::default();
        let timer = Arc::new(SyncTimer::new(ctx.config.sync_interval));
        let (jobs_tx, jobs_rx) = mpsc::channel::<PassJob>(PASS_QUEUE_DEPTH);

        let worker_handle = {
            let shutdown = shutdown_tx.clone();
            let ctx = ctx.clone();
            let state = state.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let result = pass_worker_task(ctx, state, jobs_rx, shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let session_handle = {
            let shutdown = shutdown_tx.clone();
            let ctx = ctx.clone();
            let state = state.clone();
            let timer = timer.clone();
            let jobs_tx = jobs_tx.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let result =
                    session_task(ctx, state, timer, jobs_tx, shutdown.clone(), shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let socket_handle = {
            let shutdown = shutdown_tx.clone();
            let server = SocketServer {
                ctx: ctx.clone(),
                state: state.clone(),
                timer: timer.clone(),
                jobs_tx: jobs_tx.clone(),
                shutdown_tx: shutdown.clone(),
                started_at_unix,
            };
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let result = server.serve(shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };
        drop(jobs_tx);

        let signal_handle = {
            let shutdown = shutdown_tx.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok(()),
                    signal = tokio::signal::ctrl_c() => {
                        match signal {
                            Ok(()) => {
                                tracing::info!("received ctrl-c, shutting down");
                                let _ = shutdown.send(());
                                Ok(())
                            }
                            Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                        }
                    }
                }
            })
        };

        let (worker_result, session_result, socket_result, signal_result) =
            tokio::join!(worker_handle, session_handle, socket_handle, signal_handle);

        handle_join("pass_worker", worker_result)?;
        handle_join("session", session_result)?;
        handle_join("socket_server", socket_result)?;
        handle_join("signal_handler", signal_result)?;
        tracing::info!("ranksync stopped");
        Ok(())
    }
}

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(config: Config) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(App::initialize(config).run())
}

/// Logs in, marks the session ready, then owns the timer until shutdown.
async fn session_task(
    ctx: AppContext,
    state: SharedState,
    timer: Arc<SyncTimer>,
    jobs_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let directory = ctx.directory.clone();
    let login = tokio::task::spawn_blocking(move || directory.current_user());
    let me = tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        joined = login => joined
            .map_err(|err| DaemonError::Protocol(format!("login task join error: {err}")))?
            .map_err(|err| {
                tracing::error!(error = %err, "login failed");
                DaemonError::Directory(err)
            })?,
    };
    let timer_shutdown = shutdown_tx.subscribe();

    tracing::info!(user = %me.name, user_id = %me.id, "logged in as {}", me.name);
    {
        let mut guard = state.write().await;
        guard.ready = true;
        guard.bot_user = Some(me.name.clone());
    }

    match timer.start(ctx.config.guild_id, jobs_tx, timer_shutdown) {
        Some(handle) => {
            if let Err(err) = handle.await {
                return Err(DaemonError::Protocol(format!("sync timer join error: {err}")));
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
        }
    }
    Ok(())
}

struct SocketServer {
    ctx: AppContext,
    state: SharedState,
    timer: Arc<SyncTimer>,
    jobs_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

impl SocketServer {
    async fn serve(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let socket = self.ctx.config.socket_path.clone();
        if let Some(dir) = socket.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            }
        }
        prepare_socket_for_bind(&socket)?;

        let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
        set_socket_permissions(&socket)?;
        tracing::info!(socket = %socket.display(), "manual trigger listening");

        let server = Arc::new(self);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_client(stream).await {
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

    async fn handle_client(&self, stream: UnixStream) -> Result<(), DaemonError> {
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

            let request = match serde_json::from_str::<DaemonRequest>(&line) {
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
                CMD_STATUS => DaemonResponse::ok(self.status_payload().await),
                CMD_SYNC => {
                    // Acknowledge first; the pass may take a while.
                    write_response(&mut writer, &DaemonResponse::deferred()).await?;
                    self.manual_sync(request.guild_id.map(GuildId)).await
                }
                CMD_STOP => {
                    let _ = self.shutdown_tx.send(());
                    DaemonResponse::ok(json!({ "stopping": true }))
                }
                other => DaemonResponse::error(format!("unknown command '{other}'")),
            };

            write_response(&mut writer, &response).await?;
            if request.cmd == CMD_STOP {
                break;
            }
        }

        Ok(())
    }

    async fn manual_sync(&self, guild_id: Option<GuildId>) -> DaemonResponse {
        match enqueue_pass(&self.jobs_tx, guild_id, TriggerSource::Manual).await {
            Ok(Ok(report)) => match serde_json::to_value(&report) {
                Ok(value) => DaemonResponse::ok(manual_sync_payload(&report.user_message(), value)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            Ok(Err(failure)) => DaemonResponse::error(failure.to_string()),
            Err(err) => DaemonResponse::error(err.to_string()),
        }
    }

    async fn status_payload(&self) -> Value {
        let snapshot = self.state.read().await.clone();
        let config = &self.ctx.config;
        json!({
            "running": true,
            "ready": snapshot.ready,
            "bot_user": snapshot.bot_user,
            "started_at_unix": self.started_at_unix,
            "guild_id": config.guild_id,
            "group_id": config.group_id,
            "interval_secs": config.sync_interval.as_secs(),
            "timer_running": self.timer.is_running(),
            "passes": snapshot.passes,
            "last_pass": snapshot.last_pass,
            "socket": config.socket_path.display().to_string(),
        })
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

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
