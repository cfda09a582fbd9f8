//! Per-client session state and the transport state machine
//!
//! All transport slots live behind one mutex. Channel writes happen while it is
//! held, which keeps per-transport write order equal to enqueue order and makes
//! the upgrade atomic with respect to concurrent sends. Channel callbacks that
//! re-enter the session (close notifications) are always invoked after the lock
//! is released.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::transport_state::TransportTable;
use super::{ClientsBox, HandshakeData, NamespaceClient, SessionId};
use crate::ack::AckManager;
use crate::channel::{Channel, ChannelId};
use crate::config::Config;
use crate::error::Result;
use crate::namespace::Namespace;
use crate::protocol::{Packet, PacketType, Transport};
use crate::scheduler::{CancelableScheduler, SchedulerKey, SchedulerKind};
use crate::store::Store;

/// Final teardown hook, run once when a session is gone for good
pub trait Disconnectable: Send + Sync {
    /// Release everything the server holds for `client`
    fn on_disconnect(&self, client: &Arc<ClientHead>);
}

/// Server-wide collaborators every session needs
#[derive(Clone)]
pub struct SessionContext {
    /// Immutable configuration
    pub config: Arc<Config>,
    /// Timer wheel for heartbeat and upgrade timeouts
    pub scheduler: CancelableScheduler,
    /// Ack correlation
    pub ack_manager: Arc<AckManager>,
    /// Session and channel indexes
    pub clients: Arc<ClientsBox>,
    /// Final teardown
    pub disconnectable: Arc<dyn Disconnectable>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("service", &self.config.service.name)
            .finish_non_exhaustive()
    }
}

/// One logically connected client
pub struct ClientHead {
    session_id: SessionId,
    handshake: HandshakeData,
    store: Arc<dyn Store>,
    ctx: SessionContext,
    transports: Mutex<TransportTable>,
    namespace_clients: DashMap<String, Arc<NamespaceClient>>,
    disconnected: AtomicBool,
    released: AtomicBool,
    last_binary_packet: Mutex<Option<Packet>>,
}

impl ClientHead {
    /// Create a session whose authoritative transport is `transport`
    #[must_use]
    pub fn new(
        session_id: SessionId,
        handshake: HandshakeData,
        transport: Transport,
        store: Arc<dyn Store>,
        ctx: SessionContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            handshake,
            store,
            ctx,
            transports: Mutex::new(TransportTable::new(transport)),
            namespace_clients: DashMap::new(),
            disconnected: AtomicBool::new(false),
            released: AtomicBool::new(false),
            last_binary_packet: Mutex::new(None),
        })
    }

    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Handshake metadata
    #[must_use]
    pub fn handshake_data(&self) -> &HandshakeData {
        &self.handshake
    }

    /// Per-session key/value store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Ack manager shared by every session
    #[must_use]
    pub fn ack_manager(&self) -> &Arc<AckManager> {
        &self.ctx.ack_manager
    }

    /// Transport outbound packets go to by default
    #[must_use]
    pub fn current_transport(&self) -> Transport {
        self.transports.lock().current
    }

    /// Cleared once the session starts tearing down
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Whether any bound channel is still open
    #[must_use]
    pub fn is_channel_open(&self) -> bool {
        self.transports
            .lock()
            .states()
            .iter()
            .any(|(_, state)| state.channel.as_ref().is_some_and(|c| c.is_open()))
    }

    /// Whether `channel_id` is the channel bound to `transport`
    #[must_use]
    pub fn is_transport_channel(&self, channel_id: ChannelId, transport: Transport) -> bool {
        self.transports
            .lock()
            .state(transport)
            .channel
            .as_ref()
            .is_some_and(|c| c.id() == channel_id)
    }

    /// Packets waiting in a transport queue
    #[must_use]
    pub fn queued_packets(&self, transport: Transport) -> usize {
        self.transports.lock().state(transport).queue.len()
    }

    /// Attach `channel` to a transport slot and flush what is queued for it
    ///
    /// A previously bound channel is evicted from the channel index before the
    /// new one is indexed.
    pub fn bind_channel(self: &Arc<Self>, channel: Arc<dyn Channel>, transport: Transport) -> Result<()> {
        let channel_id = channel.id();
        tracing::debug!(
            session_id = %self.session_id,
            channel_id = %channel_id,
            transport = %transport,
            "Binding channel"
        );

        let flushed = {
            let mut table = self.transports.lock();
            let state = table.state_mut(transport);
            if let Some(previous) = state.replace_channel(Arc::clone(&channel)) {
                if previous.id() != channel_id {
                    self.ctx.clients.remove_channel(previous.id(), self);
                }
            }
            self.ctx.clients.add_channel(channel_id, Arc::clone(self));
            state.flush(transport)
        };

        let weak = Arc::downgrade(self);
        channel.on_close(Box::new(move || {
            if let Some(client) = weak.upgrade() {
                client.on_channel_closed(channel_id, transport);
            }
        }));

        flushed.map_err(Into::into)
    }

    /// Unbind a finished long-poll request if it is still the bound one
    pub fn release_polling_channel(self: &Arc<Self>, channel_id: ChannelId) {
        let mut table = self.transports.lock();
        let state = table.state_mut(Transport::Polling);
        if state.channel.as_ref().is_some_and(|c| c.id() == channel_id) {
            state.channel = None;
            self.ctx.clients.remove_channel(channel_id, self);
            tracing::trace!(session_id = %self.session_id, channel_id = %channel_id, "Polling channel released");
        }
    }

    /// A channel reported itself closed
    pub(crate) fn on_channel_closed(self: &Arc<Self>, channel_id: ChannelId, transport: Transport) {
        match transport {
            Transport::Polling => self.release_polling_channel(channel_id),
            Transport::WebSocket => {
                if self.is_transport_channel(channel_id, Transport::WebSocket) {
                    tracing::debug!(session_id = %self.session_id, "Websocket closed");
                    self.on_channel_disconnect();
                }
            }
        }
    }

    /// Send on the authoritative transport
    pub fn send(&self, packet: Packet) -> Result<()> {
        let mut table = self.transports.lock();
        let transport = table.current;
        Self::enqueue(&mut table, packet, transport)
    }

    /// Send on a specific transport
    pub fn send_on(&self, packet: Packet, transport: Transport) -> Result<()> {
        let mut table = self.transports.lock();
        Self::enqueue(&mut table, packet, transport)
    }

    fn enqueue(table: &mut TransportTable, packet: Packet, transport: Transport) -> Result<()> {
        let state = table.state_mut(transport);
        state.queue.push_back(packet);
        state.flush(transport).map_err(Into::into)
    }

    /// Make `transport` authoritative, carrying over every queued packet
    ///
    /// Only the first call for a given target has an effect.
    pub fn upgrade_current_transport(&self, transport: Transport) -> Result<()> {
        let upgraded = self.transports.lock().upgrade(transport);
        match upgraded {
            Ok(true) => {
                tracing::debug!(session_id = %self.session_id, transport = %transport, "Transport upgraded");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ping_key(&self) -> SchedulerKey {
        SchedulerKey::new(SchedulerKind::PingTimeout, self.session_id)
    }

    /// Arm the heartbeat timer for `ping_timeout + ping_interval`
    ///
    /// Re-arming on client activity is up to the caller.
    pub fn schedule_ping_timeout(self: &Arc<Self>) {
        let socket = &self.ctx.config.socket;
        if !socket.heartbeats_enabled() {
            return;
        }
        self.schedule_disconnect(socket.heartbeat_timeout(), "ping timeout");
    }

    /// Arm the first-data timer; shares the heartbeat key
    pub fn schedule_first_data_timeout(self: &Arc<Self>) {
        let timeout = self.ctx.config.socket.first_data_timeout();
        self.schedule_disconnect(timeout, "first data timeout");
    }

    fn schedule_disconnect(self: &Arc<Self>, delay: std::time::Duration, reason: &'static str) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let clients = Arc::clone(&self.ctx.clients);
        let session_id = self.session_id;
        self.ctx.scheduler.schedule(self.ping_key(), delay, move || {
            let Some(client) = weak.upgrade() else {
                return;
            };
            if clients.is_registered(&client) {
                tracing::debug!(session_id = %session_id, reason, "Session expired");
                client.disconnect();
            }
        });
    }

    /// Disarm the heartbeat timer
    pub fn cancel_ping_timeout(&self) {
        self.ctx.scheduler.cancel(&self.ping_key());
    }

    /// Tell the client goodbye, close its channels and tear the session down
    pub fn disconnect(self: &Arc<Self>) {
        if let Err(e) = self.send(Packet::new(PacketType::Disconnect)) {
            tracing::debug!(session_id = %self.session_id, error = %e, "Disconnect packet not delivered");
        }

        for channel in self.bound_channels() {
            channel.close();
        }

        self.on_channel_disconnect();
    }

    fn bound_channels(&self) -> Vec<Arc<dyn Channel>> {
        self.transports
            .lock()
            .states()
            .iter()
            .filter_map(|(_, state)| state.channel.clone())
            .collect()
    }

    /// Tear down namespace children and evict every channel from the index
    ///
    /// Listener teardown runs once; channel eviction is repeated safely.
    pub(crate) fn on_channel_disconnect(self: &Arc<Self>) {
        self.cancel_ping_timeout();

        if !self.disconnected.swap(true, Ordering::AcqRel) {
            let children: Vec<Arc<NamespaceClient>> = self
                .namespace_clients
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();

            if children.is_empty() {
                self.release();
            }
            for child in children {
                child.on_disconnect();
            }
        }

        for channel in self.bound_channels() {
            self.ctx.clients.remove_channel(channel.id(), self);
        }
    }

    /// Create the child session for `namespace`
    ///
    /// Returns `None` if the session already joined that namespace.
    pub fn add_namespace_client(
        self: &Arc<Self>,
        namespace: &Arc<Namespace>,
    ) -> Option<Arc<NamespaceClient>> {
        match self.namespace_clients.entry(namespace.name().to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let client = Arc::new(NamespaceClient::new(Arc::clone(self), Arc::clone(namespace)));
                slot.insert(Arc::clone(&client));
                Some(client)
            }
        }
    }

    /// Child session for a namespace name
    #[must_use]
    pub fn child_client(&self, namespace: &str) -> Option<Arc<NamespaceClient>> {
        self.namespace_clients
            .get(namespace)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Names of every namespace this session joined
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.namespace_clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether the client has connected to at least one namespace
    #[must_use]
    pub fn has_namespaces(&self) -> bool {
        !self.namespace_clients.is_empty()
    }

    /// Forget a child session; the session is released with its last child
    pub(crate) fn remove_namespace_client(self: &Arc<Self>, namespace: &str) {
        self.namespace_clients.remove(namespace);
        if self.namespace_clients.is_empty() {
            self.release();
        }
    }

    fn release(self: &Arc<Self>) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ctx.disconnectable.on_disconnect(self);
        for channel in self.bound_channels() {
            self.ctx.clients.remove_channel(channel.id(), self);
        }
    }

    /// Store a binary event awaiting its attachments
    pub fn set_last_binary_packet(&self, packet: Option<Packet>) {
        *self.last_binary_packet.lock() = packet;
    }

    /// Take the pending binary event, clearing it
    pub fn take_last_binary_packet(&self) -> Option<Packet> {
        self.last_binary_packet.lock().take()
    }

    /// Whether a binary event is awaiting its attachments
    #[must_use]
    pub fn has_last_binary_packet(&self) -> bool {
        self.last_binary_packet.lock().is_some()
    }
}

impl fmt::Debug for ClientHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHead")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .field("namespaces", &self.namespace_clients.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ClientHead {
    fn drop(&mut self) {
        self.ctx.ack_manager.forget(self.session_id);
    }
}
