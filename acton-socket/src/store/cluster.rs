use std::sync::Arc;

use super::in_process::{InProcessBroker, InProcessPubSubStore};
use super::memory::MemoryStore;
use super::pubsub::PubSubStore;
use super::{Store, StoreFactory};
use crate::config::{ClusterBackend, ClusterConfig};
use crate::error::Result;
use crate::session::SessionId;

/// Factory for clustered nodes
///
/// Session data stays node-local; only room membership, connects,
/// disconnects and broadcasts cross the pub/sub transport.
#[derive(Debug, Clone)]
pub struct ClusterStoreFactory {
    pubsub: Arc<dyn PubSubStore>,
}

impl ClusterStoreFactory {
    /// Wrap an existing pub/sub transport
    #[must_use]
    pub fn new(pubsub: Arc<dyn PubSubStore>) -> Self {
        Self { pubsub }
    }

    /// Attach node `node_id` to an in-process broker
    pub fn in_process(broker: InProcessBroker, node_id: u64) -> Result<Self> {
        Ok(Self::new(Arc::new(InProcessPubSubStore::new(broker, node_id)?)))
    }

    /// Build the transport named by `cluster.backend`
    ///
    /// The in-process backend needs a shared `broker`; without one the node
    /// gets a private broker and effectively runs alone.
    pub async fn from_config(cluster: &ClusterConfig, broker: Option<InProcessBroker>) -> Result<Self> {
        tracing::info!(
            node_id = cluster.node_id,
            backend = ?cluster.backend,
            prefix = %cluster.channel_prefix,
            "Initializing cluster pub/sub"
        );

        match cluster.backend {
            ClusterBackend::InProcess => {
                let broker = broker.unwrap_or_else(|| {
                    tracing::warn!("In-process cluster backend without a shared broker, node is isolated");
                    InProcessBroker::new()
                });
                Self::in_process(broker, cluster.node_id)
            }
            ClusterBackend::Nats => Self::nats(cluster).await,
            ClusterBackend::Redis => Self::redis(cluster).await,
        }
    }

    #[cfg(feature = "nats")]
    async fn nats(cluster: &ClusterConfig) -> Result<Self> {
        let store = super::NatsPubSubStore::connect(cluster).await?;
        Ok(Self::new(Arc::new(store)))
    }

    #[cfg(not(feature = "nats"))]
    async fn nats(_cluster: &ClusterConfig) -> Result<Self> {
        Err(crate::error::Error::Internal(
            "cluster.backend = \"nats\" requires the `nats` feature".to_string(),
        ))
    }

    #[cfg(feature = "redis")]
    async fn redis(cluster: &ClusterConfig) -> Result<Self> {
        let store = super::RedisPubSubStore::connect(cluster).await?;
        Ok(Self::new(Arc::new(store)))
    }

    #[cfg(not(feature = "redis"))]
    async fn redis(_cluster: &ClusterConfig) -> Result<Self> {
        Err(crate::error::Error::Internal(
            "cluster.backend = \"redis\" requires the `redis` feature".to_string(),
        ))
    }
}

impl StoreFactory for ClusterStoreFactory {
    fn create_store(&self, _session_id: SessionId) -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    fn pub_sub_store(&self) -> Arc<dyn PubSubStore> {
        self.pubsub.clone()
    }

    fn on_disconnect(&self, session_id: SessionId) {
        tracing::trace!(session_id = %session_id, node_id = self.pubsub.node_id(), "Session store released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_config(backend: ClusterBackend) -> ClusterConfig {
        ClusterConfig {
            node_id: 7,
            channel_prefix: "test".to_string(),
            backend,
            nats: None,
            redis: None,
        }
    }

    #[tokio::test]
    async fn test_in_process_from_config() {
        let factory = ClusterStoreFactory::from_config(
            &cluster_config(ClusterBackend::InProcess),
            Some(InProcessBroker::new()),
        )
        .await
        .unwrap();
        assert_eq!(factory.pub_sub_store().node_id(), 7);
    }

    #[cfg(not(feature = "nats"))]
    #[tokio::test]
    async fn test_nats_backend_requires_feature() {
        let result = ClusterStoreFactory::from_config(&cluster_config(ClusterBackend::Nats), None).await;
        assert!(matches!(result, Err(crate::error::Error::Internal(_))));
    }
}
