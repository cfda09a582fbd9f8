use std::sync::Arc;

use serde_json::Value;

use crate::ack::AckRequest;
use crate::session::NamespaceClient;

/// Called after a client joined the namespace
pub type ConnectListener = Arc<dyn Fn(&Arc<NamespaceClient>) -> anyhow::Result<()> + Send + Sync>;

/// Called after a client left the namespace
pub type DisconnectListener = Arc<dyn Fn(&Arc<NamespaceClient>) -> anyhow::Result<()> + Send + Sync>;

/// Called for each inbound event with the given name
///
/// Receives the raw positional arguments; typed listeners are adapted into
/// this shape at registration.
pub type EventListener =
    Arc<dyn Fn(&Arc<NamespaceClient>, &[Value], &AckRequest) -> anyhow::Result<()> + Send + Sync>;
