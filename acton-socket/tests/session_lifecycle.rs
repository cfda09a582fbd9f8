//! Handshake, transport upgrade and heartbeat behavior of a session

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acton_socket::prelude::*;
use common::{connect_websocket, event_names, handshake_websocket, packet_types, server, server_with};

#[tokio::test]
async fn test_handshake_sends_open_with_session_metadata() {
    let server = server().await;
    let channel = Arc::new(MemoryChannel::new());

    let session = server
        .handshake(HandshakeData::new("/socket.io/"), channel.clone(), Transport::Polling)
        .unwrap();

    let packets = channel.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].packet_type, PacketType::Open);

    let open = &packets[0].data[0];
    assert_eq!(open["sid"], json!(session.session_id()));
    assert_eq!(open["upgrades"], json!(["websocket"]));
    assert_eq!(open["pingInterval"], json!(25_000));
    assert_eq!(open["pingTimeout"], json!(60_000));

    assert_eq!(server.session_count(), 1);
    assert!(server.session(session.session_id()).is_some());
}

#[tokio::test]
async fn test_connect_joins_default_namespace() {
    let server = server().await;
    let connected = Arc::new(AtomicUsize::new(0));
    let seen = connected.clone();
    server.default_namespace().add_connect_listener(move |_client| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let client = handshake_websocket(&server);
    client.channel.clear();
    client.receive(&server, Packet::new(PacketType::Connect));

    assert_eq!(packet_types(&client.channel), vec![PacketType::Connect]);
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert!(server.client(client.session_id()).is_some());

    // A repeated connect is not a second join
    client.receive(&server, Packet::new(PacketType::Connect));
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(server.all_clients().len(), 1);
}

#[tokio::test]
async fn test_connect_to_named_namespace_joins_default_first() {
    let server = server().await;
    server.add_namespace("/chat");

    let client = handshake_websocket(&server);
    client.channel.clear();
    client.receive(&server, Packet::new(PacketType::Connect).with_namespace("/chat"));

    let packets = client.channel.packets();
    let namespaces: Vec<&str> = packets.iter().map(|p| p.namespace.as_str()).collect();
    assert_eq!(namespaces, vec!["", "/chat"]);

    let mut joined = client.session.namespaces();
    joined.sort();
    assert_eq!(joined, vec!["".to_string(), "/chat".to_string()]);
}

#[tokio::test]
async fn test_connect_to_unknown_namespace_answers_error() {
    let server = server().await;
    let client = connect_websocket(&server, "");

    client.receive(&server, Packet::new(PacketType::Connect).with_namespace("/nowhere"));

    let packets = client.channel.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].packet_type, PacketType::Error);
    assert_eq!(packets[0].namespace, "/nowhere");
    assert!(server.namespace("/nowhere").is_none());
}

#[tokio::test]
async fn test_polling_to_websocket_upgrade_delivers_queued_packets_once() {
    let server = server().await;
    let polling = Arc::new(MemoryChannel::new());
    let session = server
        .handshake(HandshakeData::new("/socket.io/"), polling.clone(), Transport::Polling)
        .unwrap();
    let session_id = session.session_id();

    // The poll already answered with Open, so everything else queues
    server
        .on_packet(polling.id(), Transport::Polling, Packet::new(PacketType::Connect))
        .unwrap();
    server.client(session_id).unwrap().send_event("a", vec![]).unwrap();
    assert_eq!(packet_types(&polling), vec![PacketType::Open]);

    let websocket = Arc::new(MemoryChannel::new());
    server
        .attach_channel(session_id, websocket.clone(), Transport::WebSocket)
        .unwrap();

    server
        .on_packet(
            websocket.id(),
            Transport::WebSocket,
            Packet::new(PacketType::Ping).with_data(vec![json!("probe")]),
        )
        .unwrap();
    let probe_reply = websocket.packets();
    assert_eq!(probe_reply.len(), 1);
    assert_eq!(probe_reply[0].packet_type, PacketType::Pong);
    assert_eq!(probe_reply[0].data, vec![json!("probe")]);
    websocket.clear();

    server
        .on_packet(websocket.id(), Transport::WebSocket, Packet::new(PacketType::Upgrade))
        .unwrap();
    assert_eq!(session.current_transport(), Transport::WebSocket);

    server.client(session_id).unwrap().send_event("b", vec![]).unwrap();

    let types = packet_types(&websocket);
    assert_eq!(types.iter().filter(|t| **t == PacketType::Connect).count(), 1);
    assert!(types.contains(&PacketType::Noop));
    assert_eq!(event_names(&websocket), vec!["a".to_string(), "b".to_string()]);

    // Nothing is left behind for the polling transport
    let next_poll = Arc::new(MemoryChannel::new());
    server
        .attach_channel(session_id, next_poll.clone(), Transport::Polling)
        .unwrap();
    assert!(next_poll.packets().is_empty());
    assert_eq!(packet_types(&polling), vec![PacketType::Open]);

    // A second Upgrade is a no-op
    server
        .on_packet(websocket.id(), Transport::WebSocket, Packet::new(PacketType::Upgrade))
        .unwrap();
    assert_eq!(event_names(&websocket), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_upgrade_packet_on_polling_does_not_downgrade() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let session_id = client.session_id();

    let polling = Arc::new(MemoryChannel::new());
    server
        .attach_channel(session_id, polling.clone(), Transport::Polling)
        .unwrap();
    server
        .on_packet(polling.id(), Transport::Polling, Packet::new(PacketType::Upgrade))
        .unwrap();

    assert_eq!(client.session.current_transport(), Transport::WebSocket);
    server.client(session_id).unwrap().send_event("after", vec![]).unwrap();
    assert_eq!(event_names(&client.channel), vec!["after".to_string()]);
    assert!(event_names(&polling).is_empty());
}

#[tokio::test]
async fn test_rebinding_evicts_previous_channel() {
    let server = server().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    server
        .default_namespace()
        .add_multi_event_listener("hit", move |_client, _args, _ack| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let client = connect_websocket(&server, "");
    let replacement = Arc::new(MemoryChannel::new());
    server
        .attach_channel(client.session_id(), replacement.clone(), Transport::WebSocket)
        .unwrap();

    // Packets from the evicted channel are dropped
    client.receive(&server, Packet::event("hit", vec![]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    server
        .on_packet(replacement.id(), Transport::WebSocket, Packet::event("hit", vec![]))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server
        .client(client.session_id())
        .unwrap()
        .send_event("out", vec![])
        .unwrap();
    assert_eq!(event_names(&replacement), vec!["out".to_string()]);
    assert!(event_names(&client.channel).is_empty());
}

#[tokio::test]
async fn test_ping_answers_pong_with_payload() {
    let server = server().await;
    let client = connect_websocket(&server, "");

    client.receive(&server, Packet::new(PacketType::Ping).with_data(vec![json!("x")]));

    let packets = client.channel.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].packet_type, PacketType::Pong);
    assert_eq!(packets[0].data, vec![json!("x")]);
}

#[tokio::test(start_paused = true)]
async fn test_ping_timeout_disconnects_idle_session() {
    let mut config = Config::default();
    config.socket.ping_interval_ms = 1_000;
    config.socket.ping_timeout_ms = 1_000;
    let server = server_with(config).await;
    let client = connect_websocket(&server, "");
    let session_id = client.session_id();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    client.receive(&server, Packet::new(PacketType::Ping));
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(server.session(session_id).is_some(), "ping re-arms the heartbeat");

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    tokio::task::yield_now().await;

    assert!(server.session(session_id).is_none());
    assert!(server.client(session_id).is_none());
    assert!(packet_types(&client.channel).contains(&PacketType::Disconnect));
    assert!(!client.channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_first_data_timeout_drops_unconnected_session() {
    let server = server().await;
    let client = handshake_websocket(&server);

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(server.session_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;

    assert_eq!(server.session_count(), 0);
    assert!(!client.channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_ping_before_connect_keeps_first_data_deadline() {
    let server = server().await;
    let client = handshake_websocket(&server);

    tokio::time::sleep(Duration::from_secs(3)).await;
    client.receive(&server, Packet::new(PacketType::Ping));
    assert!(packet_types(&client.channel).contains(&PacketType::Pong));

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    tokio::task::yield_now().await;

    assert_eq!(server.session_count(), 0);
    assert!(!client.channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_connect_cancels_first_data_timeout() {
    let server = server().await;
    let client = connect_websocket(&server, "");

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(server.session(client.session_id()).is_some());
    assert!(client.channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_unfinished_upgrade_closes_websocket() {
    let server = server().await;
    let polling = Arc::new(MemoryChannel::new());
    let session = server
        .handshake(HandshakeData::new("/socket.io/"), polling.clone(), Transport::Polling)
        .unwrap();
    server
        .on_packet(polling.id(), Transport::Polling, Packet::new(PacketType::Connect))
        .unwrap();

    let websocket = Arc::new(MemoryChannel::new());
    server
        .attach_channel(session.session_id(), websocket.clone(), Transport::WebSocket)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    tokio::task::yield_now().await;

    assert!(!websocket.is_open());
    assert_eq!(session.current_transport(), Transport::Polling);
    assert!(server.session(session.session_id()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_completed_upgrade_survives_upgrade_timeout() {
    let server = server().await;
    let polling = Arc::new(MemoryChannel::new());
    let session = server
        .handshake(HandshakeData::new("/socket.io/"), polling.clone(), Transport::Polling)
        .unwrap();
    server
        .on_packet(polling.id(), Transport::Polling, Packet::new(PacketType::Connect))
        .unwrap();

    let websocket = Arc::new(MemoryChannel::new());
    server
        .attach_channel(session.session_id(), websocket.clone(), Transport::WebSocket)
        .unwrap();
    server
        .on_packet(websocket.id(), Transport::WebSocket, Packet::new(PacketType::Upgrade))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(websocket.is_open());
    assert!(server.session(session.session_id()).is_some());
}

#[tokio::test]
async fn test_unauthorized_handshake_is_refused() {
    let server = SocketServer::builder()
        .with_authorization_listener(|data: &HandshakeData| {
            data.single_query_param("token") == Some("secret")
        })
        .build()
        .await
        .unwrap();

    let refused = Arc::new(MemoryChannel::new());
    let err = server
        .handshake(HandshakeData::new("/socket.io/"), refused.clone(), Transport::WebSocket)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(server.session_count(), 0);
    assert!(refused.packets().is_empty());

    let accepted = Arc::new(MemoryChannel::new());
    server
        .handshake(
            HandshakeData::new("/socket.io/").with_query_param("token", "secret"),
            accepted.clone(),
            Transport::WebSocket,
        )
        .unwrap();
    assert_eq!(server.session_count(), 1);
}

#[tokio::test]
async fn test_disabled_transport_is_refused() {
    let mut config = Config::default();
    config.socket.transports = vec![Transport::WebSocket];
    let server = server_with(config).await;

    let err = server
        .handshake(
            HandshakeData::new("/socket.io/"),
            Arc::new(MemoryChannel::new()),
            Transport::Polling,
        )
        .unwrap_err();
    assert!(matches!(err, Error::TransportDisabled(Transport::Polling)));

    let channel = Arc::new(MemoryChannel::new());
    server
        .handshake(HandshakeData::new("/socket.io/"), channel.clone(), Transport::WebSocket)
        .unwrap();
    assert_eq!(channel.packets()[0].data[0]["upgrades"], json!([]));
}

#[tokio::test]
async fn test_close_packet_releases_session() {
    let server = server().await;
    let disconnected = Arc::new(AtomicUsize::new(0));
    let seen = disconnected.clone();
    server.default_namespace().add_disconnect_listener(move |_client| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let client = connect_websocket(&server, "");
    client.receive(&server, Packet::new(PacketType::Close));

    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(server.session_count(), 0);
    assert!(server.all_clients().is_empty());

    // The channel is no longer routed
    client.receive(&server, Packet::new(PacketType::Close));
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_disconnects_every_session() {
    let server = server().await;
    let first = connect_websocket(&server, "");
    let second = connect_websocket(&server, "");

    server.shutdown();

    assert_eq!(server.session_count(), 0);
    for client in [&first, &second] {
        assert!(packet_types(&client.channel).contains(&PacketType::Disconnect));
        assert!(!client.channel.is_open());
    }
}
