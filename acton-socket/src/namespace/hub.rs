use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::Namespace;
use crate::ack::AckMode;
use crate::exception::ExceptionListener;
use crate::session::NamespaceClient;
use crate::store::PubSubStore;

/// Registry of namespaces by name
pub struct NamespacesHub {
    namespaces: DashMap<String, Arc<Namespace>>,
    ack_mode: AckMode,
    pubsub: Arc<dyn PubSubStore>,
    exception_listener: Arc<dyn ExceptionListener>,
}

impl NamespacesHub {
    /// Create an empty registry; new namespaces inherit these collaborators
    pub fn new(
        ack_mode: AckMode,
        pubsub: Arc<dyn PubSubStore>,
        exception_listener: Arc<dyn ExceptionListener>,
    ) -> Self {
        Self {
            namespaces: DashMap::new(),
            ack_mode,
            pubsub,
            exception_listener,
        }
    }

    /// Namespace `name`, created if absent
    ///
    /// Concurrent callers with the same name all get the first instance
    /// registered.
    pub fn create(&self, name: &str) -> Arc<Namespace> {
        match self.namespaces.entry(name.to_string()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                let namespace = Arc::new(Namespace::new(
                    name,
                    self.ack_mode,
                    Arc::clone(&self.pubsub),
                    Arc::clone(&self.exception_listener),
                ));
                slot.insert(Arc::clone(&namespace));
                tracing::debug!(namespace = %name, "Namespace created");
                namespace
            }
        }
    }

    /// Namespace `name`, if registered
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Disconnect every local client in `name` and unregister it
    ///
    /// The namespace is marked removed first so a connect racing with the
    /// removal is refused. Returns the removed namespace.
    pub fn remove(&self, name: &str) -> Option<Arc<Namespace>> {
        let namespace = self.get(name)?;
        namespace.mark_removed();
        namespace.broadcast_operations().disconnect();
        self.namespaces
            .remove_if(name, |_, current| Arc::ptr_eq(current, &namespace));
        namespace.clear_membership();
        tracing::debug!(namespace = %name, "Namespace removed");
        Some(namespace)
    }

    /// Every registered namespace
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of registered namespaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Whether no namespace is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Local clients in `room` across every namespace
    ///
    /// Namespaces are captured now; each one's members are resolved only
    /// when the iterator reaches it.
    pub fn room_clients(&self, room: &str) -> impl Iterator<Item = Arc<NamespaceClient>> + Send + 'static {
        let room = room.to_string();
        self.all()
            .into_iter()
            .flat_map(move |namespace| namespace.room_clients(&room))
    }
}

impl fmt::Debug for NamespacesHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespacesHub")
            .field("namespaces", &self.namespaces.len())
            .field("ack_mode", &self.ack_mode)
            .finish_non_exhaustive()
    }
}
