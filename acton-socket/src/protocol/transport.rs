use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery mechanism a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Request/response long polling, at most one flush per bound request
    Polling,
    /// Persistent socket
    WebSocket,
}

impl Transport {
    /// Every supported transport
    pub const ALL: [Transport; 2] = [Transport::Polling, Transport::WebSocket];

    /// Name used on the wire and in handshake upgrade lists
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
