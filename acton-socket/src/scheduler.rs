//! Cancelable, keyed one-shot timers
//!
//! Every timeout in the core (heartbeat, first data, upgrade, ack) goes through
//! [`CancelableScheduler`]. Timers are tracked in a shared `DashMap` keyed by
//! [`SchedulerKey`]; each armed timer owns a child [`CancellationToken`] of the
//! scheduler's root token so [`CancelableScheduler::shutdown`] stops them all.
//!
//! Cancellation is a request, not a guarantee. A timer that already removed
//! itself from the map and started running its task will finish. Tasks must
//! re-check whatever state they act on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::session::SessionId;

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerKind {
    /// Heartbeat expiry, also used for the first-data timeout after handshake
    PingTimeout,
    /// Websocket did not complete the upgrade in time
    UpgradeTimeout,
    /// Acknowledgement not received in time
    AckTimeout,
}

/// Structured timer key: kind + session + optional numeric sub-id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerKey {
    kind: SchedulerKind,
    session_id: SessionId,
    sub_id: Option<u64>,
}

impl SchedulerKey {
    /// Key for a per-session timer
    #[must_use]
    pub fn new(kind: SchedulerKind, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            sub_id: None,
        }
    }

    /// Key for a per-ack timer
    #[must_use]
    pub fn ack(session_id: SessionId, ack_id: u64) -> Self {
        Self {
            kind: SchedulerKind::AckTimeout,
            session_id,
            sub_id: Some(ack_id),
        }
    }

    /// Timer kind
    #[must_use]
    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    /// Session the timer belongs to
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl fmt::Display for SchedulerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_id {
            Some(sub_id) => write!(f, "{:?}:{}:{}", self.kind, self.session_id, sub_id),
            None => write!(f, "{:?}:{}", self.kind, self.session_id),
        }
    }
}

#[derive(Debug)]
struct ScheduledTask {
    generation: u64,
    token: CancellationToken,
}

/// Keyed delayed-task executor
///
/// Re-scheduling a key replaces the pending task. Tasks run on the Tokio
/// runtime the scheduler was created with, never on the caller's thread.
#[derive(Debug, Clone)]
pub struct CancelableScheduler {
    runtime: Handle,
    tasks: Arc<DashMap<SchedulerKey, ScheduledTask>>,
    next_generation: Arc<AtomicU64>,
    root_token: CancellationToken,
}

impl CancelableScheduler {
    /// Create a scheduler running its timers on `runtime`
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            root_token: CancellationToken::new(),
        }
    }

    /// Create a scheduler on the ambient Tokio runtime
    pub fn from_current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("scheduler needs a Tokio runtime: {}", e)))?;
        Ok(Self::new(runtime))
    }

    /// Arm `task` to run once after `delay`, replacing any timer under `key`
    pub fn schedule<F>(&self, key: SchedulerKey, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root_token.child_token();

        // Register before spawning so a zero delay cannot fire ahead of the insert
        if let Some(previous) = self.tasks.insert(
            key,
            ScheduledTask {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let tasks = Arc::clone(&self.tasks);
        self.runtime.spawn(async move {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    tracing::trace!(key = %key, "Timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    let still_armed = tasks
                        .remove_if(&key, |_, scheduled| scheduled.generation == generation)
                        .is_some();
                    if still_armed {
                        tracing::trace!(key = %key, "Timer fired");
                        task();
                    }
                }
            }
        });
    }

    /// Cancel the timer under `key`; no-op if it already fired or never existed
    pub fn cancel(&self, key: &SchedulerKey) {
        if let Some((_, scheduled)) = self.tasks.remove(key) {
            scheduled.token.cancel();
        }
    }

    /// Whether a timer is armed under `key`
    #[must_use]
    pub fn is_scheduled(&self, key: &SchedulerKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of armed timers
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every armed timer; later `schedule` calls never fire
    pub fn shutdown(&self) {
        self.root_token.cancel();
        let pending = self.tasks.len();
        self.tasks.clear();
        tracing::debug!(pending, "Scheduler shut down");
    }
}
