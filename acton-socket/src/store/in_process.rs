use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::pubsub::{
    deliver, PubSubEnvelope, PubSubListener, PubSubMessage, PubSubStore, PubSubType, Subscriptions,
};
use crate::error::{Error, Result};

/// Shared bus for several nodes running in one process
///
/// Every node gets its own [`InProcessPubSubStore`] over a clone of the same
/// broker. Delivery is asynchronous, like the networked backends.
#[derive(Debug, Clone)]
pub struct InProcessBroker {
    sender: broadcast::Sender<Arc<PubSubEnvelope>>,
}

impl InProcessBroker {
    /// Create a broker with default capacity (1024)
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a broker with a specific capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    fn publish(&self, envelope: PubSubEnvelope) {
        // No receiver just means no other node subscribed yet
        let _ = self.sender.send(Arc::new(envelope));
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<PubSubEnvelope>> {
        self.sender.subscribe()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of an [`InProcessBroker`]
pub struct InProcessPubSubStore {
    broker: InProcessBroker,
    node_id: u64,
    runtime: Handle,
    subscriptions: Subscriptions,
}

impl InProcessPubSubStore {
    /// Attach node `node_id` to `broker`
    ///
    /// Must be called from within a Tokio runtime; receive loops are spawned on it.
    pub fn new(broker: InProcessBroker, node_id: u64) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("in-process pub/sub needs a Tokio runtime: {}", e)))?;
        Ok(Self {
            broker,
            node_id,
            runtime,
            subscriptions: Subscriptions::new(),
        })
    }
}

impl fmt::Debug for InProcessPubSubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessPubSubStore")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl PubSubStore for InProcessPubSubStore {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn publish(&self, message: PubSubMessage) {
        self.broker.publish(PubSubEnvelope {
            node_id: self.node_id,
            message,
        });
    }

    fn subscribe(&self, kind: PubSubType, listener: PubSubListener) {
        let token = self.subscriptions.replace(kind);
        let mut receiver = self.broker.subscribe();
        let node_id = self.node_id;

        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(envelope) => {
                            deliver(node_id, kind, envelope.as_ref().clone(), &listener);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(node_id, kind = %kind, skipped, "Cluster subscriber lagged, messages lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!(node_id, kind = %kind, "Cluster subscription ended");
        });
    }

    fn unsubscribe(&self, kind: PubSubType) {
        self.subscriptions.cancel(kind);
    }

    fn shutdown(&self) {
        self.subscriptions.shutdown();
    }
}
