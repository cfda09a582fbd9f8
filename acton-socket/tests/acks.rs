//! Acknowledgement correlation between outbound events and client answers

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acton_socket::prelude::*;
use common::{connect_websocket, server, server_with};
use parking_lot::Mutex;

#[tokio::test(start_paused = true)]
async fn test_unanswered_ack_times_out_once() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let child = server.client(client.session_id()).unwrap();

    let answered = Arc::new(AtomicUsize::new(0));
    let timed_out = Arc::new(AtomicUsize::new(0));
    let (a, t) = (answered.clone(), timed_out.clone());
    let ack_id = child
        .send_event_with_ack(
            "question",
            vec![json!(1)],
            AckCallback::single(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .with_timeout_secs(2)
            .on_timeout(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert_eq!(ack_id, 1);
    let sent = client.channel.packets();
    assert_eq!(sent[0].ack_id, Some(1));
    assert!(server.ack_manager().get_callback(client.session_id(), ack_id).is_some());

    tokio::time::sleep(Duration::from_millis(1_999)).await;
    assert_eq!(timed_out.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
    assert!(server.ack_manager().get_callback(client.session_id(), ack_id).is_none());

    // A late answer finds nothing to resolve
    client.receive(&server, Packet::ack(ack_id, vec![json!("late")]));
    assert_eq!(answered.load(Ordering::SeqCst), 0);
    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_answered_ack_resolves_and_disarms_timeout() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let child = server.client(client.session_id()).unwrap();

    let result = Arc::new(Mutex::new(None));
    let timed_out = Arc::new(AtomicUsize::new(0));
    let (r, t) = (result.clone(), timed_out.clone());
    let ack_id = child
        .send_event_with_ack(
            "question",
            vec![],
            AckCallback::single(move |value| {
                *r.lock() = value;
            })
            .with_timeout_secs(2)
            .on_timeout(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    client.receive(&server, Packet::ack(ack_id, vec![json!("ok"), json!("ignored")]));
    assert_eq!(*result.lock(), Some(json!("ok")));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(timed_out.load(Ordering::SeqCst), 0);
    assert_eq!(server.ack_manager().pending_count(client.session_id()), 0);
}

#[tokio::test]
async fn test_multi_callback_receives_every_result() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let child = server.client(client.session_id()).unwrap();

    let results = Arc::new(Mutex::new(Vec::new()));
    let r = results.clone();
    let ack_id = child
        .send_event_with_ack(
            "question",
            vec![],
            AckCallback::multi(move |values| {
                *r.lock() = values;
            }),
        )
        .unwrap();

    client.receive(&server, Packet::ack(ack_id, vec![json!(1), json!(2)]));
    assert_eq!(*results.lock(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_disconnect_resolves_pending_acks_as_timeouts() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let child = server.client(client.session_id()).unwrap();

    let timed_out = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let t = timed_out.clone();
        child
            .send_event_with_ack(
                "question",
                vec![],
                AckCallback::single(|_| {}).on_timeout(move || {
                    t.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }
    assert_eq!(server.ack_manager().pending_count(client.session_id()), 3);

    client.session.disconnect();

    assert_eq!(timed_out.load(Ordering::SeqCst), 3);
    assert!(!server.ack_manager().has_session(client.session_id()));

    // A send after disconnect resolves through the timeout path right away
    let t = timed_out.clone();
    let late = child.send_event_with_ack(
        "question",
        vec![],
        AckCallback::single(|_| {}).on_timeout(move || {
            t.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(late.is_err());
    assert_eq!(timed_out.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_get_distinct_ids() {
    let server = server().await;
    let client = connect_websocket(&server, "");
    let session_id = client.session_id();
    let manager = Arc::clone(server.ack_manager());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            (0..100)
                .map(|_| manager.register_ack(session_id, AckCallback::single(|_| {})))
                .collect::<Vec<u64>>()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(ids.insert(id), "ack id {id} handed out twice");
        }
    }
    assert_eq!(ids.len(), 800);
    assert_eq!(manager.pending_count(session_id), 800);
}

#[tokio::test]
async fn test_inbound_event_is_acknowledged_after_listeners() {
    let server = server().await;
    server
        .default_namespace()
        .add_multi_event_listener("ping-me", |_client, _args, _ack| Ok(()));
    let client = connect_websocket(&server, "");

    client.receive(&server, Packet::event("ping-me", vec![]).with_ack_id(7));

    let packets = client.channel.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].packet_type, PacketType::Ack);
    assert_eq!(packets[0].ack_id, Some(7));
}

#[tokio::test]
async fn test_failed_listener_suppresses_automatic_ack() {
    let server = server().await;
    server
        .default_namespace()
        .add_multi_event_listener("fails", |_client, _args, _ack| {
            Err(anyhow::anyhow!("listener failed"))
        });
    let client = connect_websocket(&server, "");

    client.receive(&server, Packet::event("fails", vec![]).with_ack_id(3));

    assert!(client.channel.packets().is_empty());
}

#[tokio::test]
async fn test_manual_mode_acks_once_with_listener_data() {
    let mut config = Config::default();
    config.socket.ack_mode = AckMode::Manual;
    let server = server_with(config).await;
    server
        .default_namespace()
        .add_multi_event_listener("sum", |_client, args, ack| {
            let total: i64 = args.iter().filter_map(Value::as_i64).sum();
            ack.send_ack_data(vec![json!(total)])?;
            ack.send_ack_data(vec![json!("again")])?;
            Ok(())
        });
    let client = connect_websocket(&server, "");

    client.receive(&server, Packet::event("sum", vec![json!(2), json!(3)]).with_ack_id(1));

    let packets = client.channel.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].data, vec![json!(5)]);
}
