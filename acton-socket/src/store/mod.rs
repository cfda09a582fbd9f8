//! Session stores and the cluster publish/subscribe bridge
//!
//! A [`StoreFactory`] hands out one [`Store`] per session and owns the
//! [`PubSubStore`] that carries connect, disconnect, join, leave and dispatch
//! events between nodes. The [`EventBus`] replays those events into the local
//! namespace registry.
//!
//! ## Backends
//!
//! - [`MemoryStoreFactory`]: single node, publishing is a no-op
//! - [`ClusterStoreFactory`] over an [`InProcessPubSubStore`]: several nodes
//!   in one process sharing an [`InProcessBroker`]
//! - `NatsPubSubStore` (feature `nats`) and `RedisPubSubStore` (feature
//!   `redis`) for nodes in separate processes

mod cluster;
mod event_bus;
mod in_process;
mod memory;
mod pubsub;

#[cfg(feature = "nats")]
mod nats_pubsub;

#[cfg(feature = "redis")]
mod redis_pubsub;

use std::sync::Arc;

use serde_json::Value;

use crate::session::SessionId;

pub use cluster::ClusterStoreFactory;
pub use event_bus::EventBus;
pub use in_process::{InProcessBroker, InProcessPubSubStore};
pub use memory::{MemoryStore, MemoryStoreFactory, NoopPubSubStore};
pub use pubsub::{PubSubEnvelope, PubSubListener, PubSubMessage, PubSubStore, PubSubType};

#[cfg(feature = "nats")]
pub use nats_pubsub::NatsPubSubStore;

#[cfg(feature = "redis")]
pub use redis_pubsub::RedisPubSubStore;

/// Per-session key/value storage for application data
pub trait Store: Send + Sync {
    /// Set a value
    fn set(&self, key: &str, value: Value);

    /// Get a value
    fn get(&self, key: &str) -> Option<Value>;

    /// Whether a key is present
    fn has(&self, key: &str) -> bool;

    /// Remove a key
    fn del(&self, key: &str);
}

/// Creates session stores and owns the cluster pub/sub transport
pub trait StoreFactory: Send + Sync {
    /// Store for a new session
    fn create_store(&self, session_id: SessionId) -> Arc<dyn Store>;

    /// Pub/sub transport shared by every component of this node
    fn pub_sub_store(&self) -> Arc<dyn PubSubStore>;

    /// Called once when a session is gone
    fn on_disconnect(&self, session_id: SessionId) {
        let _ = session_id;
    }

    /// Stop background work
    fn shutdown(&self) {
        self.pub_sub_store().shutdown();
    }
}
