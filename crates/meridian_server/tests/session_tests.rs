//! Scenario tests driving the registry and router together at the
//! channel level, without real sockets.

use std::sync::Arc;

use meridian_protocol::{ConnectionId, Origin, ServerFrame, UserId};
use meridian_server::connection::{
    Outbound, REASON_REPLACED_CONNECTION, REASON_REPLACED_SESSION, REASON_SHUTDOWN,
};
use meridian_server::{MessageRouter, SessionRegistry};
use serde_json::json;
use tokio::sync::mpsc;

fn fixture() -> (Arc<SessionRegistry>, MessageRouter) {
    let registry = Arc::new(SessionRegistry::new(32));
    let router = MessageRouter::new(Arc::clone(&registry));
    (registry, router)
}

fn open_conn(
    registry: &SessionRegistry,
    origin: &str,
) -> (ConnectionId, mpsc::Receiver<Outbound>) {
    let (id, mut rx) = registry.register(Origin::new(origin));
    let ack = ServerFrame::Connection {
        message: "Connected to Meridian server".to_string(),
        socket_id: id,
        ip: origin.to_string(),
    };
    assert!(registry.mark_open(id, &ack));
    match rx.try_recv().expect("ack should be queued") {
        Outbound::Frame(_) => {}
        other => panic!("expected ack frame, got {other:?}"),
    }
    (id, rx)
}

fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> ServerFrame {
    match rx.try_recv().expect("expected a queued command") {
        Outbound::Frame(text) => serde_json::from_str(&text).expect("frame should parse"),
        other => panic!("expected frame, got {other:?}"),
    }
}

fn next_close_reason(rx: &mut mpsc::Receiver<Outbound>) -> String {
    match rx.try_recv().expect("expected a queued command") {
        Outbound::Close { reason } => reason,
        other => panic!("expected close, got {other:?}"),
    }
}

fn drain(rx: &mut mpsc::Receiver<Outbound>) {
    while rx.try_recv().is_ok() {}
}

#[test]
fn join_and_chat_fan_out_across_connections() {
    let (registry, router) = fixture();
    let (alice, mut alice_rx) = open_conn(&registry, "203.0.113.1");
    let (bob, mut bob_rx) = open_conn(&registry, "203.0.113.2");

    router.handle_raw(alice, r#"{"type":"join","username":"Alice"}"#);
    router.handle_raw(bob, r#"{"type":"join","username":"Bob"}"#);
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    router.handle_raw(alice, r#"{"type":"chat","message":"hello everyone"}"#);

    for rx in [&mut alice_rx, &mut bob_rx] {
        match next_frame(rx) {
            ServerFrame::Chat {
                username, message, ..
            } => {
                assert_eq!(username, "Alice");
                assert_eq!(message, "hello everyone");
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    router.handle_raw(alice, r#"{"type":"player-move","position":{"x":3.0,"y":4.0}}"#);
    assert!(alice_rx.try_recv().is_err());
    assert!(matches!(
        next_frame(&mut bob_rx),
        ServerFrame::PlayerPosition { .. }
    ));
}

#[test]
fn origin_replacement_frees_the_display_name_silently() {
    let (registry, router) = fixture();
    let (first, mut first_rx) = open_conn(&registry, "198.51.100.9");
    router.handle_raw(first, r#"{"type":"join","username":"Alice"}"#);
    drain(&mut first_rx);

    // same origin reconnects; the old connection is told and closed
    let (second, _second_rx) = registry.register(Origin::new("198.51.100.9"));
    match next_frame(&mut first_rx) {
        ServerFrame::ConnectionReplaced { message } => {
            assert_eq!(message, "Your connection was replaced by a new one");
        }
        other => panic!("expected connection-replaced, got {other:?}"),
    }
    assert_eq!(next_close_reason(&mut first_rx), REASON_REPLACED_CONNECTION);

    // eviction never announces a departure, and the name is claimable again
    assert!(first_rx.try_recv().is_err());
    let ack = ServerFrame::Connection {
        message: "Connected to Meridian server".to_string(),
        socket_id: second,
        ip: "198.51.100.9".to_string(),
    };
    assert!(registry.mark_open(second, &ack));
    router.handle_raw(second, r#"{"type":"join","username":"Alice"}"#);
    assert_eq!(registry.display_name_of(second), Some("Alice".to_string()));

    // frames from the evicted connection are sendable nowhere
    assert!(!registry.send_frame(first, &ServerFrame::error("late")));
}

#[test]
fn user_login_on_second_connection_moves_the_session() {
    let (registry, _router) = fixture();
    let (laptop, mut laptop_rx) = open_conn(&registry, "203.0.113.10");
    let (phone, mut phone_rx) = open_conn(&registry, "203.0.113.11");
    let user = UserId::new("user-77");

    assert!(registry.bind_identity(laptop, user.clone()));
    assert!(registry.bind_identity(phone, user.clone()));

    // the laptop connection closes quietly, no replacement notice
    assert_eq!(next_close_reason(&mut laptop_rx), REASON_REPLACED_SESSION);
    assert!(laptop_rx.try_recv().is_err());

    // unicast for the user lands on the phone now
    assert!(registry.send_frame_to_user(
        &user,
        &ServerFrame::ReconnectSuccess {
            message: "Session restored".to_string(),
        }
    ));
    assert!(matches!(
        next_frame(&mut phone_rx),
        ServerFrame::ReconnectSuccess { .. }
    ));
}

#[test]
fn pending_queue_preserves_arrival_order_through_open() {
    let (registry, router) = fixture();
    let (talker, mut talker_rx) = open_conn(&registry, "192.0.2.1");
    router.handle_raw(talker, r#"{"type":"join","username":"Alice"}"#);
    drain(&mut talker_rx);

    // late connection receives broadcasts while still connecting
    let (late, mut late_rx) = registry.register(Origin::new("192.0.2.2"));
    router.handle_raw(talker, r#"{"type":"chat","message":"first"}"#);
    router.handle_raw(talker, r#"{"type":"chat","message":"second"}"#);
    assert!(registry.send_frame(late, &ServerFrame::error("direct")));
    assert!(late_rx.try_recv().is_err());

    let ack = ServerFrame::Connection {
        message: "Connected to Meridian server".to_string(),
        socket_id: late,
        ip: "192.0.2.2".to_string(),
    };
    assert!(registry.mark_open(late, &ack));

    assert!(matches!(
        next_frame(&mut late_rx),
        ServerFrame::Connection { .. }
    ));
    let mut texts = Vec::new();
    for _ in 0..3 {
        match next_frame(&mut late_rx) {
            ServerFrame::Chat { message, .. } => texts.push(message),
            ServerFrame::Error { message } => texts.push(message),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(texts, vec!["first", "second", "direct"]);
}

#[test]
fn reconnect_flow_round_trips_through_the_router() {
    let (registry, router) = fixture();
    let (id, mut rx) = open_conn(&registry, "192.0.2.3");
    let user = UserId::new("user-5");
    assert!(registry.bind_identity(id, user.clone()));

    router.handle_raw(id, r#"{"type":"reconnect"}"#);
    match next_frame(&mut rx) {
        ServerFrame::ReconnectSuccess { message } => assert_eq!(message, "Session restored"),
        other => panic!("expected reconnect-success, got {other:?}"),
    }
    assert_eq!(registry.connection_for_user(&user), Some(id));
    assert_eq!(registry.user_id_of(id), Some(user));
}

#[test]
fn shutdown_reaches_open_and_connecting_connections() {
    let (registry, _router) = fixture();
    let (_open_conn_id, mut open_rx) = open_conn(&registry, "192.0.2.4");
    let (_connecting_id, mut connecting_rx) = registry.register(Origin::new("192.0.2.5"));

    registry.shutdown_all();

    assert_eq!(next_close_reason(&mut open_rx), REASON_SHUTDOWN);
    assert_eq!(next_close_reason(&mut connecting_rx), REASON_SHUTDOWN);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn game_layer_payloads_ride_the_same_delivery_path() {
    let (registry, _router) = fixture();
    let (id, mut rx) = open_conn(&registry, "192.0.2.6");
    let user = UserId::new("trader-1");
    assert!(registry.bind_identity(id, user.clone()));

    let tick = json!({ "type": "stock-update", "symbol": "MRD", "price": 101.25 });
    let stats = registry.broadcast_value(&tick, None);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.errors, 0);

    match rx.try_recv().expect("tick should be delivered") {
        Outbound::Frame(text) => {
            let echoed: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(echoed, tick);
        }
        other => panic!("expected frame, got {other:?}"),
    }

    let private = json!({ "type": "portfolio", "cash": 5000 });
    assert!(registry.send_value_to_user(&user, &private));
    match rx.try_recv().expect("portfolio should be delivered") {
        Outbound::Frame(text) => {
            let echoed: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(echoed, private);
        }
        other => panic!("expected frame, got {other:?}"),
    }

    assert!(!registry.send_value_to_user(&UserId::new("nobody"), &private));
}
