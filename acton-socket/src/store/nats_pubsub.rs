//! NATS core pub/sub backend

use std::fmt;
use std::time::Duration;

use async_nats::Client;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::pubsub::{
    deliver_bytes, PubSubEnvelope, PubSubListener, PubSubMessage, PubSubStore, PubSubType, Subscriptions,
};
use crate::config::{ClusterConfig, NatsConfig};
use crate::error::{Error, Result};

/// Cluster pub/sub over NATS subjects `{prefix}.{kind}`
///
/// Publishing hands the encoded envelope to a single writer task so messages
/// from this node leave in publish order.
pub struct NatsPubSubStore {
    client: Client,
    node_id: u64,
    prefix: String,
    runtime: Handle,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
    subscriptions: Subscriptions,
}

impl NatsPubSubStore {
    /// Connect using the `[cluster.nats]` section, retrying with backoff
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self> {
        let config = cluster
            .nats
            .as_ref()
            .ok_or_else(|| Error::PubSub("NATS backend selected without [cluster.nats]".to_string()))?;
        let client = create_client_with_retries(config, config.max_retries).await?;
        Self::from_client(client, cluster.node_id, cluster.channel_prefix.clone())
    }

    /// Wrap an already connected client
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_client(client: Client, node_id: u64, prefix: String) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("NATS pub/sub needs a Tokio runtime: {}", e)))?;
        let subscriptions = Subscriptions::new();
        let (outbound, mut queue) = mpsc::unbounded_channel::<(String, Vec<u8>)>();

        let writer = client.clone();
        let shutdown = subscriptions.root();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = queue.recv() => {
                        let Some((subject, payload)) = next else { break };
                        if let Err(e) = writer.publish(subject.clone(), payload.into()).await {
                            tracing::error!(subject = %subject, error = %e, "NATS publish failed");
                        }
                    }
                }
            }
            let _ = writer.flush().await;
        });

        Ok(Self {
            client,
            node_id,
            prefix,
            runtime,
            outbound,
            subscriptions,
        })
    }

    fn subject(&self, kind: PubSubType) -> String {
        kind.subject(&self.prefix)
    }
}

impl fmt::Debug for NatsPubSubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsPubSubStore")
            .field("node_id", &self.node_id)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PubSubStore for NatsPubSubStore {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn publish(&self, message: PubSubMessage) {
        let subject = self.subject(message.kind());
        let envelope = PubSubEnvelope {
            node_id: self.node_id,
            message,
        };
        match envelope.to_vec() {
            Ok(payload) => {
                if self.outbound.send((subject, payload)).is_err() {
                    tracing::warn!("NATS publisher stopped, message dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode cluster message"),
        }
    }

    fn subscribe(&self, kind: PubSubType, listener: PubSubListener) {
        let token = self.subscriptions.replace(kind);
        let client = self.client.clone();
        let subject = self.subject(kind);
        let node_id = self.node_id;

        self.runtime.spawn(async move {
            let mut subscriber = match client.subscribe(subject.clone()).await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    tracing::error!(subject = %subject, error = %e, "NATS subscribe failed");
                    return;
                }
            };
            tracing::debug!(subject = %subject, "Subscribed to cluster subject");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = subscriber.next() => match next {
                        Some(message) => deliver_bytes(node_id, kind, &message.payload, &listener),
                        None => break,
                    },
                }
            }
            let _ = subscriber.unsubscribe().await;
        });
    }

    fn unsubscribe(&self, kind: PubSubType) {
        self.subscriptions.cancel(kind);
    }

    fn shutdown(&self) {
        self.subscriptions.shutdown();
    }
}

/// Uses exponential backoff between attempts
async fn create_client_with_retries(config: &NatsConfig, max_retries: u32) -> Result<Client> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_client(config).await {
            Ok(client) => {
                tracing::info!(url = %config.url, attempts = attempt + 1, "NATS client connected");
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    tracing::error!("Failed to connect to NATS after {} attempts: {}", max_retries + 1, e);
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "NATS connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_client(config: &NatsConfig) -> Result<Client> {
    let mut opts = async_nats::ConnectOptions::new();
    if let Some(name) = &config.name {
        opts = opts.name(name);
    }
    opts = opts.max_reconnects(Some(config.max_reconnects));

    opts.connect(&config.url)
        .await
        .map_err(|e| Error::PubSub(format!("NATS connect to '{}' failed: {}", config.url, e)))
}
