use std::sync::{Arc, Weak};

use super::pubsub::{PubSubListener, PubSubMessage, PubSubStore, PubSubType};
use crate::authorize::AuthorizeHandler;
use crate::namespace::{Namespace, NamespacesHub};

/// Applies events published by other nodes to the local registry
///
/// Joins and leaves update local membership only, and dispatches deliver
/// only to local members, so nothing received here is published again.
#[derive(Debug)]
pub struct EventBus {
    pubsub: Arc<dyn PubSubStore>,
}

impl EventBus {
    /// Subscribe to every cluster event kind
    ///
    /// The hub is held weakly; once the server is gone events are dropped.
    pub fn start(
        pubsub: Arc<dyn PubSubStore>,
        hub: &Arc<NamespacesHub>,
        authorize: &Arc<AuthorizeHandler>,
    ) -> Self {
        let node_id = pubsub.node_id();

        let handler = authorize.clone();
        pubsub.subscribe(
            PubSubType::Connect,
            Arc::new(move |message| {
                if let PubSubMessage::Connect { session_id, namespace } = message {
                    tracing::debug!(node_id, session_id = %session_id, namespace = %namespace, "Remote connect");
                    handler.connect(session_id);
                }
            }),
        );

        pubsub.subscribe(
            PubSubType::Disconnect,
            Arc::new(move |message| {
                if let PubSubMessage::Disconnect { session_id, namespace } = message {
                    tracing::debug!(node_id, session_id = %session_id, namespace = %namespace, "Remote disconnect");
                }
            }),
        );

        pubsub.subscribe(
            PubSubType::Join,
            namespace_listener(hub, |namespace, message| {
                if let PubSubMessage::Join { session_id, room, .. } = message {
                    namespace.join(&room, session_id);
                }
            }),
        );

        pubsub.subscribe(
            PubSubType::Leave,
            namespace_listener(hub, |namespace, message| {
                if let PubSubMessage::Leave { session_id, room, .. } = message {
                    namespace.leave(&room, session_id);
                }
            }),
        );

        pubsub.subscribe(
            PubSubType::Dispatch,
            namespace_listener(hub, |namespace, message| {
                if let PubSubMessage::Dispatch { room, packet, .. } = message {
                    namespace.dispatch(&room, &packet);
                }
            }),
        );

        tracing::info!(node_id, "Cluster event bus started");
        Self { pubsub }
    }

    /// Stop receiving cluster events
    pub fn stop(&self) {
        for kind in PubSubType::ALL {
            self.pubsub.unsubscribe(kind);
        }
    }
}

/// Resolve the message's namespace locally, then apply `apply`
fn namespace_listener<F>(hub: &Arc<NamespacesHub>, apply: F) -> PubSubListener
where
    F: Fn(&Arc<Namespace>, PubSubMessage) + Send + Sync + 'static,
{
    let hub: Weak<NamespacesHub> = Arc::downgrade(hub);
    Arc::new(move |message| {
        let Some(hub) = hub.upgrade() else {
            return;
        };
        match hub.get(message.namespace()) {
            Some(namespace) => apply(&namespace, message),
            None => {
                tracing::warn!(
                    namespace = %message.namespace(),
                    kind = %message.kind(),
                    "Cluster event for unknown namespace dropped"
                );
            }
        }
    })
}
