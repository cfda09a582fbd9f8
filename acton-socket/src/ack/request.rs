use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::Packet;
use crate::session::NamespaceClient;

/// Handle for answering an inbound event that asked for an acknowledgement
///
/// The answer is sent at most once no matter how many listeners or code
/// paths try. When the event did not ask for an ack, sending is a no-op.
#[derive(Debug)]
pub struct AckRequest {
    client: Arc<NamespaceClient>,
    ack_id: Option<u64>,
    sent: AtomicBool,
}

impl AckRequest {
    pub(crate) fn new(packet: &Packet, client: Arc<NamespaceClient>) -> Self {
        Self {
            client,
            ack_id: packet.ack_id.filter(|_| packet.is_ack_requested()),
            sent: AtomicBool::new(false),
        }
    }

    /// Whether the sender expects an answer
    #[must_use]
    pub fn is_ack_requested(&self) -> bool {
        self.ack_id.is_some()
    }

    /// Whether the answer already went out
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Send the answer with `data` as its positional results
    pub fn send_ack_data(&self, data: Vec<Value>) -> Result<()> {
        let Some(ack_id) = self.ack_id else {
            return Ok(());
        };
        if self.sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::trace!(session_id = %self.client.session_id(), ack_id, "Sending ack");
        self.client.send(Packet::ack(ack_id, data))
    }
}
