//! Background tasks draining an agent's stdout and stderr.
//!
//! The stdout reader frames bytes into lines with [`AgentCodec`], decodes
//! each line exactly once, and forwards the resulting [`Event`]s in order as
//! [`StreamItem`]s. The stderr drain only keeps a bounded tail for
//! diagnostics and never blocks or feeds the primary stream.

use std::collections::VecDeque;
use std::fmt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::codec::{AgentCodec, Frame};
use crate::agent::decoder::{self, Event};
use crate::agent::watchdog::WatchdogHandle;

/// How long stdout EOF waits for the process exit status.
pub const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Longest stderr line kept in the diagnostic tail, in characters.
const MAX_STDERR_LINE_CHARS: usize = 2_000;

/// Item flowing from the session's background tasks to its event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A decoded stdout line.
    Event(Event),
    /// Stdout reached EOF or the process exited.
    Closed {
        /// How the process ended; `None` when no status arrived in time.
        exit: Option<ProcessExit>,
    },
    /// The idle watchdog fired while a turn was open.
    Stalled {
        /// Silence duration that triggered the watchdog.
        idle: Duration,
    },
}

/// Exit status published by the session's exit monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal, when the process was killed by one.
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Build from the status reported by the OS.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: terminating_signal(status),
        }
    }

    /// Exit code 0.
    #[must_use]
    pub fn is_clean(self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => f.write_str("exited with unknown status"),
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Stdout reader task.
///
/// Runs until EOF, an unrecoverable I/O error, cancellation, or the item
/// channel closing. On EOF or I/O error it emits [`StreamItem::Closed`],
/// carrying the exit status if the process exits within [`EXIT_DRAIN_GRACE`].
/// Malformed lines become [`Event::DecodeError`] and never stop the task.
///
/// `done` is cancelled when the task returns so the exit monitor knows no
/// further stdout items will arrive.
pub async fn run_stdout_reader<R>(
    session_id: String,
    stdout: R,
    item_tx: mpsc::Sender<StreamItem>,
    watchdog: Option<Arc<WatchdogHandle>>,
    mut exit_rx: watch::Receiver<Option<ProcessExit>>,
    cancel: CancellationToken,
    done: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let _done = done.drop_guard();
    let mut framed = FramedRead::new(stdout, AgentCodec::new());

    loop {
        let frame = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "stdout reader: cancellation received, stopping");
                return;
            }

            frame = framed.next() => frame,
        };

        let item = match frame {
            None => {
                debug!(session_id, "stdout reader: EOF detected");
                let exit = wait_for_exit(&mut exit_rx).await;
                forward(&item_tx, StreamItem::Closed { exit }, &cancel).await;
                return;
            }

            Some(Err(err)) => {
                warn!(session_id, error = %err, "stdout reader: IO error, stopping");
                let exit = wait_for_exit(&mut exit_rx).await;
                forward(&item_tx, StreamItem::Closed { exit }, &cancel).await;
                return;
            }

            Some(Ok(Frame::Line(line))) => {
                if let Some(watchdog) = &watchdog {
                    watchdog.reset();
                }
                let Some(event) = decoder::decode(&line) else {
                    continue;
                };
                match &event {
                    Event::DecodeError { raw_line } => {
                        warn!(session_id, raw_line = %raw_line, "stdout reader: undecodable line");
                    }
                    Event::Result { .. } => {
                        if let Some(watchdog) = &watchdog {
                            watchdog.disarm();
                        }
                    }
                    _ => {}
                }
                StreamItem::Event(event)
            }

            Some(Ok(Frame::Oversized { discarded })) => {
                if let Some(watchdog) = &watchdog {
                    watchdog.reset();
                }
                warn!(session_id, discarded, "stdout reader: line exceeds limit, dropped");
                StreamItem::Event(Event::DecodeError {
                    raw_line: format!("<{discarded} bytes dropped: line exceeds limit>"),
                })
            }
        };

        if !forward(&item_tx, item, &cancel).await {
            debug!(session_id, "stdout reader: item channel closed, stopping");
            return;
        }
    }
}

/// Stderr drain task: logs each line and keeps the most recent ones.
pub async fn run_stderr_drain<R>(session_id: String, stderr: R, tail: StderrTail, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, AgentCodec::new());

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = framed.next() => frame,
        };

        match frame {
            None | Some(Err(_)) => return,
            Some(Ok(Frame::Line(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                debug!(target: "agent_stderr", session_id, line = %line);
                tail.push(line);
            }
            Some(Ok(Frame::Oversized { discarded })) => {
                tail.push(format!("<{discarded} bytes dropped>"));
            }
        }
    }
}

/// Bounded ring of the most recent stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StderrTail {
    /// Create a tail keeping at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, mut line: String) {
        if self.capacity == 0 {
            return;
        }
        if let Some((idx, _)) = line.char_indices().nth(MAX_STDERR_LINE_CHARS) {
            line.truncate(idx);
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// Last retained line, if any.
    #[must_use]
    pub fn last(&self) -> Option<String> {
        self.lines.lock().ok().and_then(|lines| lines.back().cloned())
    }
}

/// Wait briefly for the exit monitor to publish the process status.
async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ProcessExit>>) -> Option<ProcessExit> {
    match tokio::time::timeout(EXIT_DRAIN_GRACE, exit_rx.wait_for(Option::is_some)).await {
        Ok(Ok(state)) => *state,
        _ => None,
    }
}

/// Send `item` unless the session is being torn down.
async fn forward(
    item_tx: &mpsc::Sender<StreamItem>,
    item: StreamItem,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        result = item_tx.send(item) => result.is_ok(),
    }
}
