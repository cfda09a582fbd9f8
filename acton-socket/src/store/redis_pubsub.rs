//! Redis PUBLISH/SUBSCRIBE backend

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::pubsub::{
    deliver_bytes, PubSubEnvelope, PubSubListener, PubSubMessage, PubSubStore, PubSubType, Subscriptions,
};
use crate::config::{ClusterConfig, RedisConfig};
use crate::error::{Error, Result};

/// Cluster pub/sub over Redis channels `{prefix}.{kind}`
///
/// Each subscription holds its own pub/sub connection. Publishing goes
/// through one multiplexed connection driven by a single writer task.
pub struct RedisPubSubStore {
    client: redis::Client,
    node_id: u64,
    prefix: String,
    runtime: Handle,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
    subscriptions: Subscriptions,
}

impl RedisPubSubStore {
    /// Connect using the `[cluster.redis]` section, retrying with backoff
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self> {
        let config = cluster
            .redis
            .as_ref()
            .ok_or_else(|| Error::PubSub("Redis backend selected without [cluster.redis]".to_string()))?;

        let client = redis::Client::open(config.url.as_str())?;
        let connection = connect_with_retries(&client, config).await?;

        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("Redis pub/sub needs a Tokio runtime: {}", e)))?;
        let subscriptions = Subscriptions::new();
        let (outbound, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_publisher(connection, queue, subscriptions.root()));

        Ok(Self {
            client,
            node_id: cluster.node_id,
            prefix: cluster.channel_prefix.clone(),
            runtime,
            outbound,
            subscriptions,
        })
    }

    fn channel(&self, kind: PubSubType) -> String {
        kind.subject(&self.prefix)
    }
}

impl fmt::Debug for RedisPubSubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPubSubStore")
            .field("node_id", &self.node_id)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PubSubStore for RedisPubSubStore {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn publish(&self, message: PubSubMessage) {
        let channel = self.channel(message.kind());
        let envelope = PubSubEnvelope {
            node_id: self.node_id,
            message,
        };
        match envelope.to_vec() {
            Ok(payload) => {
                if self.outbound.send((channel, payload)).is_err() {
                    tracing::warn!("Redis publisher stopped, message dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode cluster message"),
        }
    }

    fn subscribe(&self, kind: PubSubType, listener: PubSubListener) {
        let token = self.subscriptions.replace(kind);
        let client = self.client.clone();
        let channel = self.channel(kind);
        let node_id = self.node_id;

        self.runtime.spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "Redis pub/sub connection failed");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                tracing::error!(channel = %channel, error = %e, "Redis subscribe failed");
                return;
            }
            tracing::debug!(channel = %channel, "Subscribed to cluster channel");

            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = messages.next() => match next {
                        Some(message) => deliver_bytes(node_id, kind, message.get_payload_bytes(), &listener),
                        None => {
                            tracing::warn!(channel = %channel, "Redis subscription stream closed");
                            break;
                        }
                    },
                }
            }
        });
    }

    fn unsubscribe(&self, kind: PubSubType) {
        self.subscriptions.cancel(kind);
    }

    fn shutdown(&self) {
        self.subscriptions.shutdown();
    }
}

async fn run_publisher(
    mut connection: MultiplexedConnection,
    mut queue: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => {
                let Some((channel, payload)) = next else { break };
                let published: redis::RedisResult<()> = connection.publish(&channel, payload).await;
                if let Err(e) = published {
                    tracing::error!(channel = %channel, error = %e, "Redis publish failed");
                }
            }
        }
    }
}

/// Uses exponential backoff between attempts
async fn connect_with_retries(client: &redis::Client, config: &RedisConfig) -> Result<MultiplexedConnection> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(connection) => {
                tracing::info!(attempts = attempt + 1, "Redis pub/sub connected");
                return Ok(connection);
            }
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to Redis after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e.into());
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "Redis connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
