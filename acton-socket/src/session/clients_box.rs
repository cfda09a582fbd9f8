use std::sync::Arc;

use dashmap::DashMap;

use super::{ClientHead, SessionId};
use crate::channel::ChannelId;

/// Global session and channel indexes
///
/// Removal is compare-and-remove: an entry is only dropped if it still points
/// at the session asking for the removal, so a replaced session never evicts
/// its successor.
#[derive(Debug, Default)]
pub struct ClientsBox {
    sessions: DashMap<SessionId, Arc<ClientHead>>,
    channels: DashMap<ChannelId, Arc<ClientHead>>,
}

impl ClientsBox {
    /// Create empty indexes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any session with the same id
    pub fn add_client(&self, client: Arc<ClientHead>) {
        self.sessions.insert(client.session_id(), client);
    }

    /// Drop `client` from the session index if it is still the registered one
    pub fn remove_client(&self, client: &Arc<ClientHead>) -> bool {
        self.sessions
            .remove_if(&client.session_id(), |_, current| Arc::ptr_eq(current, client))
            .is_some()
    }

    /// Session by id
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<Arc<ClientHead>> {
        self.sessions.get(&session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `client` is the session registered under its id
    #[must_use]
    pub fn is_registered(&self, client: &Arc<ClientHead>) -> bool {
        self.sessions
            .get(&client.session_id())
            .is_some_and(|current| Arc::ptr_eq(current.value(), client))
    }

    /// Index a channel
    pub fn add_channel(&self, channel_id: ChannelId, client: Arc<ClientHead>) {
        self.channels.insert(channel_id, client);
    }

    /// Drop a channel if it still maps to `client`
    pub fn remove_channel(&self, channel_id: ChannelId, client: &Arc<ClientHead>) -> bool {
        self.channels
            .remove_if(&channel_id, |_, current| Arc::ptr_eq(current, client))
            .is_some()
    }

    /// Session owning a channel
    #[must_use]
    pub fn get_by_channel(&self, channel_id: ChannelId) -> Option<Arc<ClientHead>> {
        self.channels.get(&channel_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every registered session
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ClientHead>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of indexed channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
