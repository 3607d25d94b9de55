//! Per-session idle watchdog.
//!
//! The watchdog is [`armed`](WatchdogHandle::arm) when a prompt is written,
//! [`reset`](WatchdogHandle::reset) on every stdout line, and
//! [`disarmed`](WatchdogHandle::disarm) once the turn's `result` arrives.
//! If an armed turn stays silent past the threshold, a
//! [`StreamItem::Stalled`] is pushed into the session's item channel so the
//! consumer never waits on a hung agent forever. It fires at most once per
//! arming.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::agent::reader::StreamItem;

/// Builder for a per-session idle watchdog.
pub struct IdleWatchdog {
    session_id: String,
    threshold: Duration,
    item_tx: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
}

impl IdleWatchdog {
    /// Construct a watchdog (does not start the timer yet).
    #[must_use]
    pub fn new(
        session_id: String,
        threshold: Duration,
        item_tx: mpsc::Sender<StreamItem>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            threshold,
            item_tx,
            cancel,
        }
    }

    /// Spawn the background timer task, initially disarmed.
    #[must_use]
    pub fn spawn(self) -> WatchdogHandle {
        let notify = Arc::new(Notify::new());
        let armed = Arc::new(AtomicBool::new(false));
        let cancel = self.cancel.clone();

        tokio::spawn(
            Self::run(
                self.session_id,
                self.threshold,
                self.item_tx,
                self.cancel,
                Arc::clone(&notify),
                Arc::clone(&armed),
            )
            .instrument(info_span!("idle_watchdog")),
        );

        WatchdogHandle {
            notify,
            armed,
            cancel,
        }
    }

    async fn run(
        session_id: String,
        threshold: Duration,
        item_tx: mpsc::Sender<StreamItem>,
        cancel: CancellationToken,
        notify: Arc<Notify>,
        armed: Arc<AtomicBool>,
    ) {
        loop {
            while !armed.load(Ordering::SeqCst) {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = notify.notified() => {}
                }
            }

            let fired = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session_id, "idle watchdog cancelled");
                    return;
                }
                () = tokio::time::sleep(threshold) => true,
                () = notify.notified() => false,
            };

            // Any arm/reset/disarm restarts the wait with fresh state.
            if !fired || !armed.swap(false, Ordering::SeqCst) {
                continue;
            }

            warn!(
                session_id,
                idle_secs = threshold.as_secs(),
                "agent produced no output within the idle threshold"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                result = item_tx.send(StreamItem::Stalled { idle: threshold }) => {
                    if result.is_err() {
                        debug!(session_id, "item channel closed, stopping watchdog");
                        return;
                    }
                }
            }
        }
    }
}

/// Handle for controlling a spawned [`IdleWatchdog`].
///
/// Dropping the handle stops the background task.
pub struct WatchdogHandle {
    notify: Arc<Notify>,
    armed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl WatchdogHandle {
    /// Start timing a turn.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Restart the idle timer after activity.
    pub fn reset(&self) {
        self.notify.notify_one();
    }

    /// Stop timing; the turn ended.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
