//! Background Tasks
//!
//! The controller owns two interval tasks: snapshot autosave
//! (fire-and-forget, failures logged and swallowed) and inactivity
//! polling (pure comparison against the stored last-activity timestamp).
//! Both are explicit, cancellable tasks torn down through a watch channel
//! so no scheduled work leaks past the controller.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::snapshot::SnapshotStoreError;

/// Inactivity thresholds, evaluated against wall-clock elapsed time
#[derive(Debug, Clone)]
pub struct InactivityConfig {
    /// Elapsed seconds before a dismissible warning is raised
    pub warn_after_secs: i64,
    /// Elapsed seconds before the session is forcibly restarted
    pub expire_after_secs: i64,
    /// How often the monitor re-evaluates
    pub poll_interval_secs: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            warn_after_secs: 300,
            expire_after_secs: 600,
            poll_interval_secs: 1,
        }
    }
}

/// Where a session currently sits relative to the thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityPhase {
    Active,
    Warning,
    Expired,
}

/// Events emitted by the inactivity monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityEvent {
    /// Warning threshold crossed; dismissible by any activity or an
    /// explicit extend action
    Warned,
    /// Hard threshold crossed; the session must be destructively restarted
    Expired,
}

/// Classify elapsed inactivity. Pure comparison over timestamps, never
/// callback-fire counts.
pub fn evaluate(
    last_activity: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &InactivityConfig,
) -> InactivityPhase {
    let elapsed = (now - last_activity).num_seconds();
    if elapsed >= config.expire_after_secs {
        InactivityPhase::Expired
    } else if elapsed >= config.warn_after_secs {
        InactivityPhase::Warning
    } else {
        InactivityPhase::Active
    }
}

/// Shared last-interaction timestamp. The controller touches it on every
/// interaction; the monitor task only reads it.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    last: Arc<Mutex<DateTime<Utc>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Record an interaction now
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    /// Restore a specific timestamp (used when resuming a snapshot)
    pub fn touch_at(&self, at: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        *last = at;
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an owned background task. Dropping the handle without calling
/// [`TaskHandle::stop`] aborts the task.
pub struct TaskHandle {
    shutdown: watch::Sender<bool>,
    // Taken by `stop`; Drop aborts whatever is left
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Signal shutdown and wait for the task to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Spawn the fixed-interval autosave task. `save` serializes the current
/// wizard state and writes it to the snapshot store; failures are logged
/// and the session continues in memory.
pub fn spawn_autosave<F, Fut>(interval_secs: u64, mut save: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), SnapshotStoreError>> + Send,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately; skip it so the initial
        // save happens one full interval after mount.
        ticker.tick().await;

        info!(interval_secs, "Autosave task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match save().await {
                        Ok(()) => debug!("Session snapshot saved"),
                        Err(e) => {
                            warn!(error = %e, "Snapshot save failed; continuing in memory");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Autosave task shutting down");
                        break;
                    }
                }
            }
        }
    });

    TaskHandle {
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

/// Spawn the inactivity monitor. Emits one `Warned` and one `Expired` per
/// quiet period; any activity starts a new quiet period. The task keeps
/// polling across forced restarts so the restarted session is still
/// monitored.
pub fn spawn_inactivity_monitor(
    tracker: ActivityTracker,
    config: InactivityConfig,
    events: mpsc::UnboundedSender<InactivityEvent>,
) -> TaskHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));
        // Timestamps of the quiet period we already warned/expired for
        let mut warned_for: Option<DateTime<Utc>> = None;
        let mut expired_for: Option<DateTime<Utc>> = None;

        info!(
            warn_after_secs = config.warn_after_secs,
            expire_after_secs = config.expire_after_secs,
            "Inactivity monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let last = tracker.last_activity();
                    match evaluate(last, Utc::now(), &config) {
                        InactivityPhase::Active => {
                            warned_for = None;
                            expired_for = None;
                        }
                        InactivityPhase::Warning => {
                            if warned_for != Some(last) {
                                warned_for = Some(last);
                                if events.send(InactivityEvent::Warned).is_err() {
                                    break; // receiver gone, nothing to monitor for
                                }
                            }
                        }
                        InactivityPhase::Expired => {
                            if expired_for != Some(last) {
                                expired_for = Some(last);
                                warn!("Inactivity hard threshold crossed; session expired");
                                if events.send(InactivityEvent::Expired).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Inactivity monitor shutting down");
                        break;
                    }
                }
            }
        }
    });

    TaskHandle {
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}
