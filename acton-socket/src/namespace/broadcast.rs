use std::sync::Arc;

use serde_json::Value;

use super::Namespace;
use crate::protocol::Packet;
use crate::session::{NamespaceClient, SessionId};
use crate::store::PubSubMessage;

/// Fan-out to a whole namespace or to one of its rooms
///
/// Sends reach local members directly and members on other nodes through a
/// cluster `dispatch` message.
#[derive(Debug, Clone)]
pub struct BroadcastOperations {
    namespace: Arc<Namespace>,
    room: Option<String>,
}

impl BroadcastOperations {
    pub(crate) fn new(namespace: Arc<Namespace>, room: Option<String>) -> Self {
        Self { namespace, room }
    }

    /// Room the operations target; the namespace's own room when unset
    #[must_use]
    pub fn room(&self) -> &str {
        self.room.as_deref().unwrap_or_else(|| self.namespace.name())
    }

    /// Local clients in the target
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<NamespaceClient>> {
        match &self.room {
            Some(room) => self.namespace.room_clients(room).collect(),
            None => self.namespace.clients(),
        }
    }

    /// Send `packet` to every member on every node
    pub fn send(&self, packet: Packet) {
        let room = self.room().to_string();
        self.namespace.dispatch(&room, &packet);
        self.namespace.publish(PubSubMessage::Dispatch {
            namespace: self.namespace.name().to_string(),
            room,
            packet,
        });
    }

    /// Emit an event to every member on every node
    pub fn send_event(&self, name: impl Into<String>, data: Vec<Value>) {
        self.send(Packet::event(name, data));
    }

    /// Emit an event to every local member except `exclude`
    ///
    /// Exclusion cannot be expressed in a cluster dispatch, so this never
    /// leaves the node.
    pub fn send_event_except(&self, name: impl Into<String>, exclude: SessionId, data: Vec<Value>) {
        let packet = Packet::event(name, data);
        for client in self.clients() {
            if client.session_id() == exclude {
                continue;
            }
            if let Err(e) = client.send(packet.clone()) {
                tracing::debug!(session_id = %client.session_id(), error = %e, "Broadcast to client failed");
            }
        }
    }

    /// Disconnect every local member from the namespace
    pub fn disconnect(&self) {
        for client in self.clients() {
            client.disconnect();
        }
    }
}
