use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::{ClientHead, HandshakeData, SessionId};
use crate::ack::AckCallback;
use crate::error::{ChannelError, Error, Result};
use crate::namespace::Namespace;
use crate::protocol::{Packet, PacketType, Transport};

/// A session as seen from inside one namespace
///
/// This is the handle application listeners receive. Dropping out of the
/// namespace does not end the session unless it was the last namespace.
pub struct NamespaceClient {
    base: Arc<ClientHead>,
    namespace: Arc<Namespace>,
    disconnected: AtomicBool,
}

impl NamespaceClient {
    pub(crate) fn new(base: Arc<ClientHead>, namespace: Arc<Namespace>) -> Self {
        Self {
            base,
            namespace,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.base.session_id()
    }

    /// Namespace this child belongs to
    #[must_use]
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Underlying session
    #[must_use]
    pub fn base_client(&self) -> &Arc<ClientHead> {
        &self.base
    }

    /// Handshake metadata
    #[must_use]
    pub fn handshake_data(&self) -> &HandshakeData {
        self.base.handshake_data()
    }

    /// Peer address, if known
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.base.handshake_data().remote_address
    }

    /// Authoritative transport
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.base.current_transport()
    }

    /// Connected to this namespace and the session still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire) && self.base.is_connected()
    }

    /// Whether any transport channel is still open
    #[must_use]
    pub fn is_channel_open(&self) -> bool {
        self.base.is_channel_open()
    }

    /// Send a packet in this namespace; dropped silently once disconnected
    pub fn send(&self, packet: Packet) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.base
            .send(packet.with_namespace(self.namespace.name()))
    }

    /// Send a packet and await its acknowledgement through `callback`
    ///
    /// Returns the ack id put on the packet. On a disconnected client the
    /// callback's timeout path runs right away.
    pub fn send_with_ack(&self, packet: Packet, callback: AckCallback) -> Result<u64> {
        if !self.is_connected() {
            callback.fire_timeout();
            return Err(Error::Channel(ChannelError::Closed(format!(
                "session {}",
                self.session_id()
            ))));
        }
        let ack_id = self
            .base
            .ack_manager()
            .register_ack(self.session_id(), callback);
        self.send(packet.with_ack_id(ack_id))?;
        Ok(ack_id)
    }

    /// Emit an event
    pub fn send_event(&self, name: impl Into<String>, data: Vec<Value>) -> Result<()> {
        self.send(Packet::event(name, data))
    }

    /// Emit an event and await its acknowledgement
    pub fn send_event_with_ack(
        &self,
        name: impl Into<String>,
        data: Vec<Value>,
        callback: AckCallback,
    ) -> Result<u64> {
        self.send_with_ack(Packet::event(name, data), callback)
    }

    /// Leave this namespace, telling the client
    pub fn disconnect(self: &Arc<Self>) {
        if let Err(e) = self.send(Packet::new(PacketType::Disconnect)) {
            tracing::debug!(
                session_id = %self.session_id(),
                namespace = %self.namespace.name(),
                error = %e,
                "Namespace disconnect packet not delivered"
            );
        }
        self.on_disconnect();
    }

    /// Detach from the namespace; runs once
    pub(crate) fn on_disconnect(self: &Arc<Self>) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(
            session_id = %self.session_id(),
            namespace = %self.namespace.name(),
            "Client left namespace"
        );
        self.namespace.on_disconnect(self);
        self.base.remove_namespace_client(self.namespace.name());
    }

    /// Join a room in this namespace, cluster-wide
    pub fn join_room(&self, room: &str) {
        self.namespace.join_room(room, self.session_id());
    }

    /// Leave a room in this namespace, cluster-wide
    pub fn leave_room(&self, room: &str) {
        self.namespace.leave_room(room, self.session_id());
    }

    /// Rooms this client is in
    #[must_use]
    pub fn all_rooms(&self) -> HashSet<String> {
        self.namespace.rooms_of(self.session_id())
    }

    /// Store a value in the session store
    pub fn set(&self, key: &str, value: Value) {
        self.base.store().set(key, value);
    }

    /// Read a value from the session store
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.base.store().get(key)
    }

    /// Whether the session store has a key
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.base.store().has(key)
    }

    /// Remove a key from the session store
    pub fn del(&self, key: &str) {
        self.base.store().del(key);
    }
}

impl fmt::Debug for NamespaceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceClient")
            .field("session_id", &self.session_id())
            .field("namespace", &self.namespace.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}
