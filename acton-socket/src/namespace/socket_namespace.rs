use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::broadcast::BroadcastOperations;
use super::listener::{ConnectListener, DisconnectListener, EventListener};
use super::rooms::RoomMembership;
use crate::ack::{AckMode, AckRequest};
use crate::exception::ExceptionListener;
use crate::protocol::Packet;
use crate::session::{NamespaceClient, SessionId};
use crate::store::{PubSubMessage, PubSubStore};

/// An application-defined partition of the event space
///
/// Owns the namespace's connected clients, its room index and the listeners
/// registered by the application. Every client joins the room named after
/// the namespace on connect.
pub struct Namespace {
    name: String,
    ack_mode: AckMode,
    pubsub: Arc<dyn PubSubStore>,
    exception_listener: Arc<dyn ExceptionListener>,
    all_clients: DashMap<SessionId, Arc<NamespaceClient>>,
    membership: RoomMembership,
    event_listeners: DashMap<String, Vec<EventListener>>,
    connect_listeners: RwLock<Vec<ConnectListener>>,
    disconnect_listeners: RwLock<Vec<DisconnectListener>>,
    removed: AtomicBool,
}

impl Namespace {
    /// Create an empty namespace
    pub fn new(
        name: impl Into<String>,
        ack_mode: AckMode,
        pubsub: Arc<dyn PubSubStore>,
        exception_listener: Arc<dyn ExceptionListener>,
    ) -> Self {
        Self {
            name: name.into(),
            ack_mode,
            pubsub,
            exception_listener,
            all_clients: DashMap::new(),
            membership: RoomMembership::new(),
            event_listeners: DashMap::new(),
            connect_listeners: RwLock::new(Vec::new()),
            disconnect_listeners: RwLock::new(Vec::new()),
            removed: AtomicBool::new(false),
        }
    }

    /// Namespace name; the empty string is the default namespace
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ack policy applied to inbound events
    #[must_use]
    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Listen for `event`, decoding its first argument as `T`
    ///
    /// A missing argument decodes from `null`. A payload that does not decode
    /// counts as a listener failure.
    pub fn add_event_listener<T, F>(&self, event: impl Into<String>, listener: F)
    where
        T: DeserializeOwned,
        F: Fn(&Arc<NamespaceClient>, T, &AckRequest) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let adapted: EventListener = Arc::new(
            move |client: &Arc<NamespaceClient>, args: &[Value], ack: &AckRequest| {
                let first = args.first().cloned().unwrap_or(Value::Null);
                let payload: T = serde_json::from_value(first)?;
                listener(client, payload, ack)
            },
        );
        self.event_listeners.entry(event.into()).or_default().push(adapted);
    }

    /// Listen for `event` with access to every positional argument
    pub fn add_multi_event_listener<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Arc<NamespaceClient>, &[Value], &AckRequest) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.event_listeners
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Run `listener` for every client that connects
    pub fn add_connect_listener<F>(&self, listener: F)
    where
        F: Fn(&Arc<NamespaceClient>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.connect_listeners.write().push(Arc::new(listener));
    }

    /// Run `listener` for every client that leaves
    pub fn add_disconnect_listener<F>(&self, listener: F)
    where
        F: Fn(&Arc<NamespaceClient>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.disconnect_listeners.write().push(Arc::new(listener));
    }

    /// Drop every listener for `event`
    pub fn remove_all_listeners(&self, event: &str) {
        self.event_listeners.remove(event);
    }

    /// Add to a room on this node only
    pub fn join(&self, room: &str, session_id: SessionId) {
        self.membership.join(room, session_id);
    }

    /// Remove from a room on this node only
    pub fn leave(&self, room: &str, session_id: SessionId) {
        self.membership.leave(room, session_id);
    }

    /// Add to a room on every node
    pub fn join_room(&self, room: &str, session_id: SessionId) {
        self.join(room, session_id);
        self.pubsub.publish(PubSubMessage::Join {
            session_id,
            namespace: self.name.clone(),
            room: room.to_string(),
        });
    }

    /// Remove from a room on every node
    pub fn leave_room(&self, room: &str, session_id: SessionId) {
        self.leave(room, session_id);
        self.pubsub.publish(PubSubMessage::Leave {
            session_id,
            namespace: self.name.clone(),
            room: room.to_string(),
        });
    }

    /// Rooms a session is in
    #[must_use]
    pub fn rooms_of(&self, session_id: SessionId) -> HashSet<String> {
        self.membership.rooms_of(session_id)
    }

    /// Every non-empty room
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.membership.rooms()
    }

    /// Local clients in `room`
    ///
    /// Membership is snapshotted now; clients are resolved as the iterator
    /// advances, skipping members whose channel lives on another node.
    pub fn room_clients(
        self: &Arc<Self>,
        room: &str,
    ) -> impl Iterator<Item = Arc<NamespaceClient>> + Send + 'static {
        let namespace = Arc::clone(self);
        self.membership
            .members(room)
            .into_iter()
            .filter_map(move |session_id| namespace.client(session_id))
    }

    /// Every local client
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<NamespaceClient>> {
        self.all_clients.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Local client by session id
    #[must_use]
    pub fn client(&self, session_id: SessionId) -> Option<Arc<NamespaceClient>> {
        self.all_clients.get(&session_id).map(|e| Arc::clone(e.value()))
    }

    /// Number of local clients
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.all_clients.len()
    }

    /// Deliver `packet` to every local member of `room`
    pub fn dispatch(&self, room: &str, packet: &Packet) {
        for session_id in self.membership.members(room) {
            let Some(client) = self.client(session_id) else {
                continue;
            };
            if let Err(e) = client.send(packet.clone()) {
                tracing::debug!(
                    session_id = %session_id,
                    namespace = %self.name,
                    room = %room,
                    error = %e,
                    "Dispatch to client failed"
                );
            }
        }
    }

    /// Operations targeting every client in the namespace
    #[must_use]
    pub fn broadcast_operations(self: &Arc<Self>) -> BroadcastOperations {
        BroadcastOperations::new(Arc::clone(self), None)
    }

    /// Operations targeting one room
    #[must_use]
    pub fn room_operations(self: &Arc<Self>, room: impl Into<String>) -> BroadcastOperations {
        BroadcastOperations::new(Arc::clone(self), Some(room.into()))
    }

    pub(crate) fn publish(&self, message: PubSubMessage) {
        self.pubsub.publish(message);
    }

    /// A client joined: index it, put it in the default room, run listeners
    pub fn on_connect(&self, client: &Arc<NamespaceClient>) {
        let session_id = client.session_id();
        self.all_clients.insert(session_id, Arc::clone(client));
        self.join_room(&self.name, session_id);

        tracing::debug!(session_id = %session_id, namespace = %self.name, "Client connected to namespace");

        let listeners = self.connect_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener(client) {
                self.exception_listener.on_connect_exception(&e, client);
                break;
            }
        }
    }

    /// Route an inbound event to its listeners, then apply the ack policy
    ///
    /// The first failing listener stops the rest. Events nobody listens for
    /// are dropped without an ack.
    pub fn on_event(&self, client: &Arc<NamespaceClient>, packet: &Packet) {
        let Some(event) = packet.name.as_deref() else {
            tracing::warn!(session_id = %client.session_id(), namespace = %self.name, "Event packet without a name");
            return;
        };
        let Some(listeners) = self.event_listeners.get(event).map(|e| e.value().clone()) else {
            tracing::debug!(session_id = %client.session_id(), namespace = %self.name, event, "No listener for event");
            return;
        };

        let ack = AckRequest::new(packet, Arc::clone(client));
        let mut succeeded = true;
        for listener in listeners {
            if let Err(e) = listener(client, &packet.data, &ack) {
                self.exception_listener.on_event_exception(&e, &packet.data, client);
                succeeded = false;
                break;
            }
        }

        if ack.is_ack_requested() && self.ack_mode.should_auto_ack(succeeded) {
            if let Err(e) = ack.send_ack_data(Vec::new()) {
                tracing::debug!(session_id = %client.session_id(), error = %e, "Automatic ack not delivered");
            }
        }
    }

    /// A client left: drop it from every room on every node, then run listeners
    pub fn on_disconnect(&self, client: &Arc<NamespaceClient>) {
        let session_id = client.session_id();
        self.all_clients.remove(&session_id);

        for room in self.membership.rooms_of(session_id) {
            self.leave_room(&room, session_id);
        }

        tracing::debug!(session_id = %session_id, namespace = %self.name, "Client disconnected from namespace");

        let listeners = self.disconnect_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener(client) {
                self.exception_listener.on_disconnect_exception(&e, client);
                break;
            }
        }
    }

    /// Forget every membership; used when the namespace is removed
    pub(crate) fn clear_membership(&self) {
        self.membership.clear();
    }

    /// Refuse further connects; set once, before the namespace is unregistered
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Whether the namespace has been removed from its hub
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("ack_mode", &self.ack_mode)
            .field("clients", &self.all_clients.len())
            .field("rooms", &self.membership.room_count())
            .finish_non_exhaustive()
    }
}
