//! Cluster message types and the publish/subscribe contract

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::protocol::Packet;
use crate::session::SessionId;

/// Kind of cluster event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PubSubType {
    /// A session connected on some node
    Connect,
    /// A session disconnected on some node
    Disconnect,
    /// A session joined a room
    Join,
    /// A session left a room
    Leave,
    /// A packet was broadcast to a room
    Dispatch,
}

impl PubSubType {
    /// Every kind
    pub const ALL: [PubSubType; 5] = [
        PubSubType::Connect,
        PubSubType::Disconnect,
        PubSubType::Join,
        PubSubType::Leave,
        PubSubType::Dispatch,
    ];

    /// Subject/channel suffix
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Dispatch => "dispatch",
        }
    }

    /// Subject or channel carrying this kind under `prefix`
    #[must_use]
    pub fn subject(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.as_str())
    }
}

impl fmt::Display for PubSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PubSubMessage {
    /// Session connected to a namespace
    Connect {
        /// Session
        session_id: SessionId,
        /// Namespace name
        namespace: String,
    },
    /// Session disconnected
    Disconnect {
        /// Session
        session_id: SessionId,
        /// Namespace name
        namespace: String,
    },
    /// Session joined a room
    Join {
        /// Session
        session_id: SessionId,
        /// Namespace name
        namespace: String,
        /// Room name
        room: String,
    },
    /// Session left a room
    Leave {
        /// Session
        session_id: SessionId,
        /// Namespace name
        namespace: String,
        /// Room name
        room: String,
    },
    /// Packet broadcast to a room
    Dispatch {
        /// Namespace name
        namespace: String,
        /// Room name
        room: String,
        /// Packet to deliver
        packet: Packet,
    },
}

impl PubSubMessage {
    /// Kind of this message
    #[must_use]
    pub fn kind(&self) -> PubSubType {
        match self {
            Self::Connect { .. } => PubSubType::Connect,
            Self::Disconnect { .. } => PubSubType::Disconnect,
            Self::Join { .. } => PubSubType::Join,
            Self::Leave { .. } => PubSubType::Leave,
            Self::Dispatch { .. } => PubSubType::Dispatch,
        }
    }

    /// Namespace the message targets
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace, .. }
            | Self::Join { namespace, .. }
            | Self::Leave { namespace, .. }
            | Self::Dispatch { namespace, .. } => namespace,
        }
    }
}

/// Message plus the node that published it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubEnvelope {
    /// Publishing node
    pub node_id: u64,
    /// Payload
    pub message: PubSubMessage,
}

impl PubSubEnvelope {
    /// Decode from wire bytes
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode to wire bytes
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Handler for messages published by other nodes
pub type PubSubListener = Arc<dyn Fn(PubSubMessage) + Send + Sync>;

/// Cluster publish/subscribe contract
///
/// Delivery is at-least-once and asynchronous. Every store stamps its node id
/// on publish and drops messages carrying its own id on receive, so a node
/// never replays its own events.
pub trait PubSubStore: Send + Sync + fmt::Debug {
    /// Identifier of this node
    fn node_id(&self) -> u64;

    /// Publish a message to every other node; never blocks
    fn publish(&self, message: PubSubMessage);

    /// Deliver messages of `kind` from other nodes to `listener`
    ///
    /// A second subscription for the same kind replaces the first.
    fn subscribe(&self, kind: PubSubType, listener: PubSubListener);

    /// Stop delivering `kind`
    fn unsubscribe(&self, kind: PubSubType);

    /// Stop all background work
    fn shutdown(&self);
}

/// Hand an inbound envelope to `listener` unless this node sent it
pub(crate) fn deliver(node_id: u64, kind: PubSubType, envelope: PubSubEnvelope, listener: &PubSubListener) {
    if envelope.node_id == node_id || envelope.message.kind() != kind {
        return;
    }
    listener(envelope.message);
}

/// Decode wire bytes and deliver, logging malformed payloads
pub(crate) fn deliver_bytes(node_id: u64, kind: PubSubType, payload: &[u8], listener: &PubSubListener) {
    match PubSubEnvelope::from_slice(payload) {
        Ok(envelope) => deliver(node_id, kind, envelope, listener),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "Dropping malformed cluster message");
        }
    }
}

/// Per-kind subscription tokens under one root token
#[derive(Debug)]
pub(crate) struct Subscriptions {
    root: CancellationToken,
    active: DashMap<PubSubType, CancellationToken>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: DashMap::new(),
        }
    }

    /// Token for a new subscription, cancelling the one it replaces
    pub(crate) fn replace(&self, kind: PubSubType) -> CancellationToken {
        let token = self.root.child_token();
        if let Some(previous) = self.active.insert(kind, token.clone()) {
            previous.cancel();
        }
        token
    }

    pub(crate) fn cancel(&self, kind: PubSubType) {
        if let Some((_, token)) = self.active.remove(&kind) {
            token.cancel();
        }
    }

    /// Token cancelled on shutdown, for publisher tasks
    pub(crate) fn root(&self) -> CancellationToken {
        self.root.clone()
    }

    pub(crate) fn shutdown(&self) {
        self.root.cancel();
        self.active.clear();
    }
}
