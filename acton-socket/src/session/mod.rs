//! Sessions: one logical client across transport switches
//!
//! A [`ClientHead`] is created on handshake and lives until the client leaves
//! its last namespace or stops sending heartbeats. Inside each namespace the
//! same session is seen as a [`NamespaceClient`].

mod clients_box;
mod handshake;
mod head;
mod namespace_client;
mod transport_state;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use clients_box::ClientsBox;
pub use handshake::HandshakeData;
pub use head::{ClientHead, Disconnectable, SessionContext};
pub use namespace_client::NamespaceClient;

/// Unique identifier for a session
///
/// Sent to the client in the handshake and used as the correlation key by the
/// ack manager, the scheduler and the cluster bus.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
