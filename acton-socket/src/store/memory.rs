use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::pubsub::{PubSubListener, PubSubMessage, PubSubStore, PubSubType};
use super::{Store, StoreFactory};
use crate::session::SessionId;

/// Session store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn del(&self, key: &str) {
        self.values.remove(key);
    }
}

/// Pub/sub for a single node: nothing leaves the process
#[derive(Debug, Default)]
pub struct NoopPubSubStore {
    node_id: u64,
}

impl NoopPubSubStore {
    /// Create a store reporting `node_id`
    #[must_use]
    pub fn new(node_id: u64) -> Self {
        Self { node_id }
    }
}

impl PubSubStore for NoopPubSubStore {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn publish(&self, message: PubSubMessage) {
        tracing::trace!(kind = %message.kind(), "Single node, cluster publish skipped");
    }

    fn subscribe(&self, _kind: PubSubType, _listener: PubSubListener) {}

    fn unsubscribe(&self, _kind: PubSubType) {}

    fn shutdown(&self) {}
}

/// Single node factory: in-memory session stores, no cluster traffic
#[derive(Debug)]
pub struct MemoryStoreFactory {
    pubsub: Arc<NoopPubSubStore>,
}

impl MemoryStoreFactory {
    /// Create a factory
    #[must_use]
    pub fn new() -> Self {
        Self {
            pubsub: Arc::new(NoopPubSubStore::new(0)),
        }
    }
}

impl Default for MemoryStoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn create_store(&self, _session_id: SessionId) -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    fn pub_sub_store(&self) -> Arc<dyn PubSubStore> {
        self.pubsub.clone()
    }
}
