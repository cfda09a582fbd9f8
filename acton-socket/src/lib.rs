//! # acton-socket
//!
//! Realtime socket server core: sessions that survive transport switches,
//! acknowledgement correlation, namespaces and rooms, and a cluster event bus
//! that lets several processes behave as one server.
//!
//! ## Features
//!
//! - **Sessions**: one logical client across long-polling and websocket, with
//!   ordered per-transport queues and a lossless one-time upgrade
//! - **Acks**: per-session ids, single or multi-value callbacks, timeouts that
//!   race safely with late answers
//! - **Namespaces & rooms**: idempotent membership, room dispatch, namespace
//!   removal with forced disconnect
//! - **Cluster bus**: join, leave, dispatch, connect and disconnect replayed on
//!   every node through an in-process broker, NATS (`nats` feature) or Redis
//!   (`redis` feature)
//! - **Heartbeats**: keyed, cancelable timers for ping, first-data and upgrade
//!   timeouts
//!
//! Frame encoding and the HTTP/websocket servers stay outside; adapters feed
//! decoded [`Packet`](protocol::Packet)s and [`Channel`](channel::Channel)s in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acton_socket::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let server = SocketServer::builder().with_config(config).build().await?;
//!
//!     server.default_namespace().add_connect_listener(|client| {
//!         client.join_room("lobby");
//!         Ok(())
//!     });
//!
//!     // A transport adapter hands over channels and decoded packets
//!     let (channel, outbound) = MpscChannel::new(64);
//!     let session = server.handshake(
//!         HandshakeData::new("/socket.io/"),
//!         Arc::new(channel),
//!         Transport::WebSocket,
//!     )?;
//!     server.connect(&session)?;
//!
//!     server.room_operations("lobby").send_event("welcome", vec![]);
//!     server.shutdown();
//!     drop(outbound);
//!     Ok(())
//! }
//! ```

pub mod ack;
pub mod authorize;
pub mod channel;
pub mod config;
pub mod error;
pub mod exception;
pub mod namespace;
pub mod observability;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod store;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ack::{AckCallback, AckMode, AckRequest};
    pub use crate::authorize::{AllowAll, AuthorizationListener};
    pub use crate::channel::{Channel, ChannelId, MemoryChannel, MpscChannel};
    pub use crate::config::{ClusterBackend, ClusterConfig, Config, SocketConfig};
    pub use crate::error::{ChannelError, Error, Result};
    pub use crate::exception::{DefaultExceptionListener, ExceptionListener};
    pub use crate::namespace::{BroadcastOperations, Namespace, NamespacesHub, DEFAULT_NAMESPACE};
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::protocol::{Packet, PacketType, Transport};
    pub use crate::server::{SocketServer, SocketServerBuilder};
    pub use crate::session::{ClientHead, HandshakeData, NamespaceClient, SessionId};
    pub use crate::store::{
        ClusterStoreFactory, InProcessBroker, MemoryStoreFactory, PubSubMessage, PubSubStore, Store,
        StoreFactory,
    };

    pub use serde_json::{json, Value};
}
