//! Rooms, namespaces and fan-out across nodes sharing an in-process broker

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use acton_socket::prelude::*;
use common::{cluster_config, connect_websocket, event_names, eventually, packet_types, server};

async fn node(broker: &InProcessBroker, node_id: u64) -> SocketServer {
    SocketServer::builder()
        .with_config(cluster_config(node_id))
        .with_in_process_broker(broker.clone())
        .build()
        .await
        .expect("node should build")
}

#[tokio::test]
async fn test_room_broadcast_reaches_member_on_other_node() {
    let broker = InProcessBroker::new();
    let node_a = node(&broker, 1).await;
    let node_b = node(&broker, 2).await;

    let client = connect_websocket(&node_a, "");
    let session_id = client.session_id();
    node_a.client(session_id).unwrap().join_room("r");

    let namespace_b = node_b.default_namespace();
    assert!(eventually(|| namespace_b.rooms_of(session_id).contains("r")).await);

    node_b
        .room_operations("r")
        .send_event("news", vec![json!("hello")]);

    let channel = Arc::clone(&client.channel);
    assert!(eventually(|| event_names(&channel) == vec!["news".to_string()]).await);
    assert_eq!(channel.packets()[0].data, vec![json!("hello")]);

    // Node B has no local members to deliver to
    assert_eq!(node_b.room_clients("r").count(), 0);
}

#[tokio::test]
async fn test_namespace_broadcast_spans_nodes() {
    let broker = InProcessBroker::new();
    let node_a = node(&broker, 1).await;
    let node_b = node(&broker, 2).await;

    let on_a = connect_websocket(&node_a, "");
    let on_b = connect_websocket(&node_b, "");
    let namespace_a = node_a.default_namespace();
    let remote = on_b.session_id();
    assert!(eventually(|| namespace_a.rooms_of(remote).contains(DEFAULT_NAMESPACE)).await);

    node_a.broadcast_operations().send_event("all", vec![]);

    let (channel_a, channel_b) = (Arc::clone(&on_a.channel), Arc::clone(&on_b.channel));
    assert!(eventually(|| event_names(&channel_b) == vec!["all".to_string()]).await);
    assert_eq!(event_names(&channel_a), vec!["all".to_string()]);
}

#[tokio::test]
async fn test_disconnect_leaves_rooms_on_every_node() {
    let broker = InProcessBroker::new();
    let node_a = node(&broker, 1).await;
    let node_b = node(&broker, 2).await;

    let client = connect_websocket(&node_a, "");
    let session_id = client.session_id();
    let child = node_a.client(session_id).unwrap();
    child.join_room("r1");
    child.join_room("r2");

    let namespace_b = node_b.default_namespace();
    assert!(eventually(|| namespace_b.rooms_of(session_id).len() == 3).await);

    client.receive(&node_a, Packet::new(PacketType::Close));

    assert!(node_a.default_namespace().rooms_of(session_id).is_empty());
    assert!(eventually(|| namespace_b.rooms_of(session_id).is_empty()).await);
}

#[tokio::test]
async fn test_remote_join_is_idempotent() {
    let broker = InProcessBroker::new();
    let node_a = node(&broker, 1).await;
    let node_b = node(&broker, 2).await;

    let client = connect_websocket(&node_a, "");
    let session_id = client.session_id();
    let child = node_a.client(session_id).unwrap();
    child.join_room("r");
    child.join_room("r");

    let namespace_b = node_b.default_namespace();
    assert!(eventually(|| namespace_b.rooms_of(session_id).contains("r")).await);

    node_b.room_operations("r").send_event("once", vec![]);

    let channel = Arc::clone(&client.channel);
    assert!(eventually(|| !event_names(&channel).is_empty()).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(event_names(&channel), vec!["once".to_string()]);
}

#[tokio::test]
async fn test_events_for_unknown_namespace_are_ignored_remotely() {
    let broker = InProcessBroker::new();
    let node_a = node(&broker, 1).await;
    let node_b = node(&broker, 2).await;

    node_a.add_namespace("/only-a");
    let client = connect_websocket(&node_a, "/only-a");
    let session_id = client.session_id();

    let namespace_a = node_a.namespace("/only-a").unwrap();
    assert!(namespace_a.rooms_of(session_id).contains("/only-a"));

    // Node B never registered the namespace and must not create it
    let default_b = node_b.default_namespace();
    assert!(eventually(|| default_b.rooms_of(session_id).contains(DEFAULT_NAMESPACE)).await);
    assert!(node_b.namespace("/only-a").is_none());
}

#[tokio::test]
async fn test_remove_namespace_disconnects_its_clients() {
    let server = server().await;
    server.add_namespace("/ns");
    let disconnected = Arc::new(AtomicUsize::new(0));
    let seen = disconnected.clone();
    server
        .namespace("/ns")
        .unwrap()
        .add_disconnect_listener(move |_client| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let clients: Vec<_> = (0..3).map(|_| connect_websocket(&server, "/ns")).collect();
    assert_eq!(server.namespace("/ns").unwrap().client_count(), 3);

    server.remove_namespace("/ns");

    assert!(server.namespace("/ns").is_none());
    assert_eq!(disconnected.load(Ordering::SeqCst), 3);
    for client in &clients {
        let packets = client.channel.packets();
        assert!(packets
            .iter()
            .any(|p| p.packet_type == PacketType::Disconnect && p.namespace == "/ns"));
        assert_eq!(client.session.namespaces(), vec![DEFAULT_NAMESPACE.to_string()]);
    }

    // Sessions stay alive in the default namespace
    assert_eq!(server.session_count(), 3);
    assert_eq!(server.all_clients().len(), 3);

    // Re-adding starts from a clean slate
    let fresh = server.add_namespace("/ns");
    assert_eq!(fresh.client_count(), 0);
    assert!(fresh.rooms().is_empty());
    assert!(packet_types(&clients[0].channel).contains(&PacketType::Disconnect));
}
