//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use acton_socket::prelude::*;

/// Server with default configuration
pub async fn server() -> SocketServer {
    server_with(Config::default()).await
}

/// Server with a custom configuration
pub async fn server_with(config: Config) -> SocketServer {
    SocketServer::builder()
        .with_config(config)
        .build()
        .await
        .expect("server should build")
}

/// Config for one node of an in-process cluster
pub fn cluster_config(node_id: u64) -> Config {
    let mut config = Config::default();
    config.cluster = Some(ClusterConfig {
        node_id,
        channel_prefix: "acton-socket-test".to_string(),
        backend: ClusterBackend::InProcess,
        nats: None,
        redis: None,
    });
    config
}

/// A session and the recording channel it talks through
pub struct TestClient {
    pub session: Arc<ClientHead>,
    pub channel: Arc<MemoryChannel>,
}

impl TestClient {
    pub fn session_id(&self) -> SessionId {
        self.session.session_id()
    }

    /// Feed an inbound packet from this client's channel
    pub fn receive(&self, server: &SocketServer, packet: Packet) {
        server
            .on_packet(self.channel.id(), Transport::WebSocket, packet)
            .expect("packet should route");
    }
}

/// Handshake over websocket without connecting any namespace
pub fn handshake_websocket(server: &SocketServer) -> TestClient {
    let channel = Arc::new(MemoryChannel::new());
    let session = server
        .handshake(HandshakeData::new("/socket.io/"), channel.clone(), Transport::WebSocket)
        .expect("handshake should succeed");
    TestClient { session, channel }
}

/// Handshake over websocket and connect `namespace`, forgetting the preamble
pub fn connect_websocket(server: &SocketServer, namespace: &str) -> TestClient {
    let client = handshake_websocket(server);
    client.receive(server, Packet::new(PacketType::Connect).with_namespace(namespace));
    client.channel.clear();
    client
}

pub fn packet_types(channel: &MemoryChannel) -> Vec<PacketType> {
    channel.packets().iter().map(|p| p.packet_type).collect()
}

pub fn event_names(channel: &MemoryChannel) -> Vec<String> {
    channel
        .packets()
        .iter()
        .filter_map(|p| p.name.clone())
        .collect()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
