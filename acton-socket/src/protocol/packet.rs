use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Packet type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// Handshake response carrying session metadata
    Open,
    /// Transport-level close
    Close,
    /// Heartbeat request
    Ping,
    /// Heartbeat response
    Pong,
    /// Completes a transport upgrade
    Upgrade,
    /// Filler used to release a pending long poll
    Noop,
    /// Namespace connect
    Connect,
    /// Namespace disconnect
    Disconnect,
    /// Application event
    Event,
    /// Acknowledgement of a previously sent event
    Ack,
    /// Namespace-level error
    Error,
    /// Application event with binary attachments
    BinaryEvent,
    /// Acknowledgement with binary attachments
    BinaryAck,
}

/// A decoded protocol packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Type tag
    pub packet_type: PacketType,

    /// Namespace the packet belongs to (empty string is the default namespace)
    #[serde(default)]
    pub namespace: String,

    /// Event name for event packets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Positional payload
    #[serde(default)]
    pub data: Vec<Value>,

    /// Acknowledgement id, present when an ack is requested or carried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl Packet {
    /// Create an empty packet of the given type
    #[must_use]
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            namespace: String::new(),
            name: None,
            data: Vec::new(),
            ack_id: None,
        }
    }

    /// Create an event packet
    #[must_use]
    pub fn event(name: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            name: Some(name.into()),
            data,
            ..Self::new(PacketType::Event)
        }
    }

    /// Create an acknowledgement packet answering `ack_id`
    #[must_use]
    pub fn ack(ack_id: u64, data: Vec<Value>) -> Self {
        Self {
            data,
            ack_id: Some(ack_id),
            ..Self::new(PacketType::Ack)
        }
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the positional payload
    #[must_use]
    pub fn with_data(mut self, data: Vec<Value>) -> Self {
        self.data = data;
        self
    }

    /// Set the acknowledgement id
    #[must_use]
    pub fn with_ack_id(mut self, ack_id: u64) -> Self {
        self.ack_id = Some(ack_id);
        self
    }

    /// Whether the sender expects an acknowledgement for this event
    #[must_use]
    pub fn is_ack_requested(&self) -> bool {
        self.ack_id.is_some() && self.is_event()
    }

    /// Event or binary event
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self.packet_type, PacketType::Event | PacketType::BinaryEvent)
    }

    /// Ack or binary ack
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self.packet_type, PacketType::Ack | PacketType::BinaryAck)
    }
}
