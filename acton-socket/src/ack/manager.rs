//! Per-session ack id allocation and callback correlation
//!
//! Each session owns an ack entry: an id counter and a table of pending
//! callbacks. Whoever removes a callback from the table (the ack, the timer,
//! or the disconnect sweep) is the only party allowed to run it.
//!
//! A disconnected session keeps its closed entry until the session itself is
//! dropped, so late registrations still resolve as timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::callback::{AckCallback, AckCallbackInfo, AckHandler};
use crate::protocol::Packet;
use crate::scheduler::{CancelableScheduler, SchedulerKey};
use crate::session::SessionId;

const UNSET_INDEX: i64 = -1;

#[derive(Default)]
struct PendingAcks {
    callbacks: HashMap<u64, AckCallback>,
    closed: bool,
}

struct AckEntry {
    index: AtomicI64,
    pending: Mutex<PendingAcks>,
}

impl AckEntry {
    fn new() -> Self {
        Self {
            index: AtomicI64::new(UNSET_INDEX),
            pending: Mutex::new(PendingAcks::default()),
        }
    }

    fn next_index(&self) -> u64 {
        // Lazily start at 0 unless a seed was installed first
        let _ = self
            .index
            .compare_exchange(UNSET_INDEX, 0, Ordering::AcqRel, Ordering::Acquire);
        let id = self.index.fetch_add(1, Ordering::AcqRel) + 1;
        id.unsigned_abs()
    }

    fn init_index(&self, seed: u64) -> bool {
        let seed = i64::try_from(seed).unwrap_or(i64::MAX);
        self.index
            .compare_exchange(UNSET_INDEX, seed, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store the callback; hands it back if the session is already gone
    fn insert(&self, id: u64, callback: AckCallback) -> Option<AckCallback> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Some(callback);
        }
        pending.callbacks.insert(id, callback);
        None
    }

    fn remove(&self, id: u64) -> Option<AckCallback> {
        self.pending.lock().callbacks.remove(&id)
    }

    fn info(&self, id: u64) -> Option<AckCallbackInfo> {
        self.pending.lock().callbacks.get(&id).map(AckCallback::info)
    }

    fn close(&self) -> Vec<(u64, AckCallback)> {
        let mut pending = self.pending.lock();
        pending.closed = true;
        let mut drained: Vec<_> = pending.callbacks.drain().collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }

    fn len(&self) -> usize {
        self.pending.lock().callbacks.len()
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }
}

/// Correlates acknowledgement packets with the callbacks that await them
pub struct AckManager {
    entries: DashMap<SessionId, Arc<AckEntry>>,
    scheduler: CancelableScheduler,
}

impl AckManager {
    /// Create a manager arming its timeouts on `scheduler`
    #[must_use]
    pub fn new(scheduler: CancelableScheduler) -> Self {
        Self {
            entries: DashMap::new(),
            scheduler,
        }
    }

    fn entry(&self, session_id: SessionId) -> Arc<AckEntry> {
        self.entries
            .entry(session_id)
            .or_insert_with(|| Arc::new(AckEntry::new()))
            .value()
            .clone()
    }

    /// Seed the session's id counter; ignored once the counter is set
    pub fn init_ack_index(&self, session_id: SessionId, seed: u64) {
        if !self.entry(session_id).init_index(seed) {
            tracing::debug!(session_id = %session_id, seed, "Ack index already initialized");
        }
    }

    /// Register `callback` and return the ack id to put on the outbound packet
    pub fn register_ack(&self, session_id: SessionId, callback: AckCallback) -> u64 {
        let entry = self.entry(session_id);
        let ack_id = entry.next_index();
        let timeout = callback.timeout();

        if let Some(rejected) = entry.insert(ack_id, callback) {
            tracing::debug!(
                session_id = %session_id,
                ack_id,
                "Ack registered after disconnect, resolving as timeout"
            );
            rejected.fire_timeout();
            return ack_id;
        }

        tracing::debug!(session_id = %session_id, ack_id, "Ack callback registered");

        if let Some(timeout) = timeout {
            let weak: Weak<AckEntry> = Arc::downgrade(&entry);
            self.scheduler
                .schedule(SchedulerKey::ack(session_id, ack_id), timeout, move || {
                    let Some(entry) = weak.upgrade() else {
                        return;
                    };
                    if let Some(callback) = entry.remove(ack_id) {
                        tracing::debug!(session_id = %session_id, ack_id, "Ack timed out");
                        callback.fire_timeout();
                    }
                });
        }

        ack_id
    }

    /// Resolve the callback for the ack id carried by `packet`
    ///
    /// Unknown sessions and ids (late or duplicate acks) are ignored.
    pub fn on_ack(&self, session_id: SessionId, packet: &Packet) {
        let Some(ack_id) = packet.ack_id else {
            tracing::debug!(session_id = %session_id, "Ack packet without id ignored");
            return;
        };
        let Some(entry) = self.entries.get(&session_id).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let Some(callback) = entry.remove(ack_id) else {
            tracing::debug!(session_id = %session_id, ack_id, "No pending callback for ack");
            return;
        };

        self.scheduler.cancel(&SchedulerKey::ack(session_id, ack_id));

        match callback.into_handler() {
            AckHandler::Multi(f) => f(packet.data.clone()),
            AckHandler::Single(f) => {
                if packet.data.len() > 1 {
                    tracing::warn!(
                        session_id = %session_id,
                        ack_id,
                        args = packet.data.len(),
                        "Ack carried more than one argument, using the first"
                    );
                }
                f(packet.data.first().cloned())
            }
        }
    }

    /// Shape and timeout of a pending callback
    #[must_use]
    pub fn get_callback(&self, session_id: SessionId, ack_id: u64) -> Option<AckCallbackInfo> {
        self.entries.get(&session_id)?.info(ack_id)
    }

    /// Close the session's ack table, resolving every pending callback as timed out
    ///
    /// The closed table stays registered until [`AckManager::forget`], so any
    /// later registration for the session is rejected instead of leaking.
    pub fn on_disconnect(&self, session_id: SessionId) {
        let entry = self.entry(session_id);
        let pending = entry.close();
        if !pending.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                pending = pending.len(),
                "Resolving pending acks on disconnect"
            );
        }
        self.resolve_as_timeouts(session_id, pending);
    }

    /// Drop every trace of the session once nothing can reach it anymore
    pub(crate) fn forget(&self, session_id: SessionId) {
        if let Some((_, entry)) = self.entries.remove(&session_id) {
            self.resolve_as_timeouts(session_id, entry.close());
        }
    }

    fn resolve_as_timeouts(&self, session_id: SessionId, pending: Vec<(u64, AckCallback)>) {
        for (ack_id, callback) in pending {
            self.scheduler.cancel(&SchedulerKey::ack(session_id, ack_id));
            callback.fire_timeout();
        }
    }

    /// Number of callbacks awaiting an answer for a session
    #[must_use]
    pub fn pending_count(&self, session_id: SessionId) -> usize {
        self.entries.get(&session_id).map_or(0, |entry| entry.len())
    }

    /// Whether the session has an open ack table
    #[must_use]
    pub fn has_session(&self, session_id: SessionId) -> bool {
        self.entries
            .get(&session_id)
            .is_some_and(|entry| !entry.is_closed())
    }
}

impl std::fmt::Debug for AckManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckManager")
            .field("sessions", &self.entries.len())
            .finish()
    }
}
