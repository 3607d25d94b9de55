//! Agent process driver.
//!
//! [`SessionManager::start`] spawns the resolved executable with all three
//! stdio pipes attached and wires up the background tasks:
//!
//! - a stdout reader that frames, decodes, and forwards [`Event`]s;
//! - a stderr drain that keeps a bounded diagnostic tail;
//! - an exit monitor that owns the [`Child`] and kills it on [`SessionHandle::stop`];
//! - an optional idle watchdog.
//!
//! The returned [`SessionHandle`] writes prompts to stdin and hands out a
//! single-consumer [`EventStream`] per turn. Dropping an [`EventStream`] never
//! touches the process; only `interrupt` and `stop` do.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::decoder::Event;
use crate::agent::locator::{AgentExecutable, ExecutableKind};
use crate::agent::reader::{
    run_stderr_drain, run_stdout_reader, ProcessExit, StderrTail, StreamItem, EXIT_DRAIN_GRACE,
};
use crate::agent::watchdog::{IdleWatchdog, WatchdogHandle};
use crate::config::{GlobalConfig, StdinFormat};
use crate::models::options::SessionOptions;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Everything else is stripped via `env_clear()` before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TMPDIR",
    "RUST_LOG",
    "ANTHROPIC_API_KEY",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Environment variable carrying the session identifier into the agent.
pub const SESSION_ID_ENV: &str = "AGENT_CONDUIT_SESSION_ID";

/// Capacity of the per-session item channel.
const ITEM_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ────────────────────────────────────────────────────────────

/// Process-level settings shared by every session a manager starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interpreter used for [`ExecutableKind::BundledScript`].
    pub script_interpreter: String,
    /// Idle watchdog threshold; `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Number of stderr lines retained for diagnostics.
    pub stderr_tail_lines: usize,
    /// Prompt framing on stdin.
    pub stdin_format: StdinFormat,
}

impl SessionConfig {
    /// Derive session settings from the global configuration.
    #[must_use]
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            script_interpreter: config.agent.script_interpreter.clone(),
            idle_timeout: config.idle_timeout(),
            stderr_tail_lines: config.agent.stderr_tail_lines,
            stdin_format: config.agent.stdin_format,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Spawns agent sessions for one resolved executable.
#[derive(Debug, Clone)]
pub struct SessionManager {
    executable: AgentExecutable,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager for `executable`.
    #[must_use]
    pub fn new(executable: AgentExecutable, config: SessionConfig) -> Self {
        Self { executable, config }
    }

    /// Spawn a new agent process and start its background tasks.
    ///
    /// # Errors
    ///
    /// - [`AppError::Spawn`] if the interpreter cannot be found, the process
    ///   fails to launch, or a stdio pipe cannot be captured.
    pub async fn start(&self, options: &SessionOptions) -> Result<SessionHandle> {
        let session_id = Uuid::new_v4().to_string();
        let mut cmd = self.command(options)?;

        // Strip inherited environment, then inject only the safe allowlist.
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env(SESSION_ID_ENV, &session_id);

        cmd.current_dir(&options.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn agent: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

        let pid = child.id();
        info!(
            session_id,
            pid = pid.unwrap_or(0),
            path = %self.executable.path.display(),
            "agent process spawned"
        );

        let (item_tx, item_rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let reader_done = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let tail = StderrTail::new(self.config.stderr_tail_lines);

        let watchdog = self.config.idle_timeout.map(|threshold| {
            Arc::new(
                IdleWatchdog::new(
                    session_id.clone(),
                    threshold,
                    item_tx.clone(),
                    cancel.child_token(),
                )
                .spawn(),
            )
        });

        tokio::spawn(run_stdout_reader(
            session_id.clone(),
            stdout,
            item_tx.clone(),
            watchdog.clone(),
            exit_rx,
            cancel.clone(),
            reader_done.clone(),
        ));

        tokio::spawn(run_stderr_drain(
            session_id.clone(),
            stderr,
            tail.clone(),
            cancel.clone(),
        ));

        let monitor = monitor_exit(ExitMonitor {
            session_id: session_id.clone(),
            child,
            exit_tx,
            item_tx,
            alive: Arc::clone(&alive),
            reader_done,
            cancel: cancel.clone(),
        });

        Ok(SessionHandle {
            id: session_id,
            pid,
            stdin: Mutex::new(Some(stdin)),
            items: Arc::new(Mutex::new(item_rx)),
            alive,
            turn_open: Arc::new(AtomicBool::new(false)),
            turn_seq: AtomicU64::new(0),
            stderr: tail,
            watchdog,
            cancel,
            monitor: Mutex::new(Some(monitor)),
            stdin_format: self.config.stdin_format,
        })
    }

    /// Build the launch command: interpreter + script, or the binary itself.
    fn command(&self, options: &SessionOptions) -> Result<Command> {
        let mut cmd = match self.executable.kind {
            ExecutableKind::BundledScript => {
                let interpreter = resolve_interpreter(&self.config.script_interpreter)?;
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.executable.path);
                cmd
            }
            ExecutableKind::InstalledBinary => Command::new(&self.executable.path),
        };
        cmd.args(options.to_args());
        Ok(cmd)
    }
}

fn resolve_interpreter(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|err| {
        AppError::Spawn(format!("script interpreter `{name}` not found: {err}"))
    })
}

/// Frame a prompt as a single stdin line.
#[must_use]
pub fn encode_prompt(format: StdinFormat, prompt: &str) -> String {
    let mut line = match format {
        StdinFormat::Line => prompt.replace("\r\n", " ").replace(['\n', '\r'], " "),
        StdinFormat::Json => json!({ "type": "user", "content": prompt }).to_string(),
    };
    line.push('\n');
    line
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// A live agent process and its pipes.
///
/// At most one turn is in flight: [`send`](Self::send) is rejected until the
/// previous turn's [`EventStream`] has yielded its terminal item.
pub struct SessionHandle {
    id: String,
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    items: Arc<Mutex<mpsc::Receiver<StreamItem>>>,
    alive: Arc<AtomicBool>,
    turn_open: Arc<AtomicBool>,
    turn_seq: AtomicU64,
    stderr: StderrTail,
    watchdog: Option<Arc<WatchdogHandle>>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    stdin_format: StdinFormat,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .field("turn_open", &self.is_turn_open())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Session identifier (also exported to the agent as [`SESSION_ID_ENV`]).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// OS process id, if the platform reported one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is still running and not stopped.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether a turn's stream is still open.
    #[must_use]
    pub fn is_turn_open(&self) -> bool {
        self.turn_open.load(Ordering::SeqCst)
    }

    /// Number of turns opened so far; each [`send`](Self::send) that opens a
    /// turn increments it.
    #[must_use]
    pub fn turn_seq(&self) -> u64 {
        self.turn_seq.load(Ordering::SeqCst)
    }

    /// Write `prompt` plus a newline to the agent's stdin, opening a turn.
    ///
    /// # Errors
    ///
    /// - [`AppError::SessionNotStarted`] if the session is stopped, the
    ///   process has exited, or stdin is closed.
    /// - [`AppError::TurnInProgress`] if the previous turn is still streaming.
    pub async fn send(&self, prompt: &str) -> Result<()> {
        if !self.is_alive() {
            return Err(AppError::SessionNotStarted(format!(
                "session '{}' is not running",
                self.id
            )));
        }

        if self.turn_open.swap(true, Ordering::SeqCst) {
            return Err(AppError::TurnInProgress(format!(
                "session '{}' is still streaming the previous turn",
                self.id
            )));
        }
        let turn = self.turn_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let line = encode_prompt(self.stdin_format, prompt);
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            self.turn_open.store(false, Ordering::SeqCst);
            return Err(AppError::SessionNotStarted(format!(
                "session '{}' stdin is closed",
                self.id
            )));
        };

        // Must be armed before the prompt can reach the agent.
        if let Some(watchdog) = &self.watchdog {
            watchdog.arm();
        }

        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        }
        .await;

        if let Err(err) = written {
            warn!(session_id = %self.id, %err, "write to agent stdin failed");
            if let Some(watchdog) = &self.watchdog {
                watchdog.disarm();
            }
            stdin.take();
            self.turn_open.store(false, Ordering::SeqCst);
            return Err(AppError::SessionNotStarted(format!(
                "session '{}' stdin write failed: {err}",
                self.id
            )));
        }

        debug!(session_id = %self.id, turn, bytes = line.len(), "prompt written");
        Ok(())
    }

    /// Take the event stream for the current turn.
    ///
    /// Waits if another consumer currently holds the stream; the stream is
    /// released when that consumer drops it.
    pub async fn stream(&self) -> EventStream {
        let items = Arc::clone(&self.items).lock_owned().await;
        EventStream {
            session_id: self.id.clone(),
            items,
            turn_open: Arc::clone(&self.turn_open),
            stderr: self.stderr.clone(),
            finished: false,
        }
    }

    /// Ask the agent to abandon its current work (SIGINT on unix).
    ///
    /// Best effort: a no-op on a dead session, and the agent may ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the signal cannot be delivered.
    pub fn interrupt(&self) -> Result<()> {
        if !self.is_alive() {
            debug!(session_id = %self.id, "interrupt on dead session; no-op");
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        send_interrupt(&self.id, pid)
    }

    /// Kill the process and release its pipes. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
        self.turn_open.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            if let Err(err) = monitor.await {
                warn!(session_id = %self.id, %err, "exit monitor task failed");
            }
            info!(session_id = %self.id, "agent session stopped");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(unix)]
fn send_interrupt(session_id: &str, pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGINT)
        .map_err(|err| AppError::Io(format!("failed to interrupt agent: {err}")))?;
    info!(session_id, pid, "sent SIGINT to agent");
    Ok(())
}

#[cfg(not(unix))]
fn send_interrupt(session_id: &str, pid: u32) -> Result<()> {
    warn!(session_id, pid, "soft interrupt unsupported on this platform; use stop");
    Ok(())
}

// ── Event stream ─────────────────────────────────────────────────────────────

/// Single-consumer stream of one turn's events.
///
/// Ends after the first terminal signal: a `result` event, stdout EOF, or
/// process exit. Only a clean exit (code 0) or [`SessionHandle::stop`] ends
/// the stream quietly; any other exit, and an idle-watchdog expiry, is
/// reported as a final `Err` item. Dropping the stream leaves the process
/// running.
pub struct EventStream {
    session_id: String,
    items: OwnedMutexGuard<mpsc::Receiver<StreamItem>>,
    turn_open: Arc<AtomicBool>,
    stderr: StderrTail,
    finished: bool,
}

impl EventStream {
    fn finish(&mut self) {
        self.finished = true;
        self.turn_open.store(false, Ordering::SeqCst);
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let Poll::Ready(item) = self.items.poll_recv(cx) else {
            return Poll::Pending;
        };

        let next = match item {
            None => {
                debug!(session_id = %self.session_id, "event stream: channel closed");
                None
            }
            Some(StreamItem::Event(event)) => {
                if event.is_terminal() {
                    self.finish();
                }
                return Poll::Ready(Some(Ok(event)));
            }
            Some(StreamItem::Closed { exit: Some(exit) }) if exit.is_clean() => None,
            Some(StreamItem::Closed { exit }) => {
                let status = exit.map_or_else(
                    || "closed its output without an exit status".to_owned(),
                    |exit| exit.to_string(),
                );
                let detail = self
                    .stderr
                    .last()
                    .map(|line| format!(": {line}"))
                    .unwrap_or_default();
                warn!(session_id = %self.session_id, %status, "agent ended mid-turn");
                Some(Err(AppError::AgentExited(format!("process {status}{detail}"))))
            }
            Some(StreamItem::Stalled { idle }) => Some(Err(AppError::Timeout(format!(
                "agent produced no output for {}s",
                idle.as_secs()
            )))),
        };

        self.finish();
        Poll::Ready(next)
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

struct ExitMonitor {
    session_id: String,
    child: Child,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    item_tx: mpsc::Sender<StreamItem>,
    alive: Arc<AtomicBool>,
    reader_done: CancellationToken,
    cancel: CancellationToken,
}

/// Own the child until it exits or the session is stopped.
///
/// On exit the status is published for the stdout reader; if stdout is still
/// open after [`EXIT_DRAIN_GRACE`] (a grandchild holding the pipe), the
/// monitor closes the stream itself. On cancellation the child is killed and
/// reaped.
fn monitor_exit(monitor: ExitMonitor) -> JoinHandle<()> {
    let ExitMonitor {
        session_id,
        mut child,
        exit_tx,
        item_tx,
        alive,
        reader_done,
        cancel,
    } = monitor;

    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let exit = match result {
                    Ok(status) => ProcessExit::from_status(status),
                    Err(err) => {
                        warn!(session_id, %err, "error waiting for agent child process");
                        ProcessExit { code: None, signal: None }
                    }
                };
                alive.store(false, Ordering::SeqCst);
                exit_tx.send_replace(Some(exit));
                info!(session_id, exit_code = ?exit.code, signal = ?exit.signal, "agent process exited");

                tokio::select! {
                    () = reader_done.cancelled() => {}
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(EXIT_DRAIN_GRACE) => {
                        debug!(session_id, "stdout still open after exit; closing stream");
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            _ = item_tx.send(StreamItem::Closed { exit: Some(exit) }) => {}
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    debug!(session_id, %err, "kill on stop failed (already exited?)");
                }
                alive.store(false, Ordering::SeqCst);
                exit_tx.send_replace(Some(ProcessExit { code: None, signal: None }));
                debug!(session_id, "exit monitor: process killed on stop");
            }
        }
    })
}
