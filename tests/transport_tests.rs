// Integration tests for the transport actor
//
// These drive `Transport` against an in-memory endpoint with tokio's paused
// clock, so reconnect delays elapse instantly.

mod common;

use common::{transport_config, Outcome, ScriptedConnector};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use voice_call::transport::{ClientMessage, ConnectionState, ControlMessage, Transport};

async fn wait_status(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("status never became {}", want))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_builds_endpoint_url() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector.clone());
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;

    let server = servers.recv().await.unwrap();
    assert_eq!(
        server.url.as_str(),
        "ws://voice.test/ws/audio?enable_search=false&enable_functions=true"
    );

    // Connecting again while open does nothing
    transport.connect();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_in_order_and_malformed_dropped() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, mut inbound) = Transport::spawn(transport_config(), connector);
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let server = servers.recv().await.unwrap();

    server.send(json!({"type": "ready", "features": {"available_functions": ["search"]}}));
    server.send_raw("{not json");
    server.send(json!({"type": "something_new"}));
    server.send(json!({"type": "text", "data": "hello"}));
    server.send(json!({"type": "turn_complete"}));

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let message = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        kinds.push(message.kind());
    }
    assert_eq!(kinds, vec!["ready", "text", "turn_complete"]);

    // The connection survives bad frames
    assert_eq!(transport.status(), ConnectionState::Connected);
    assert!(inbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_send_only_while_open() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector);
    let mut status = transport.subscribe();

    let audio = ClientMessage::Audio {
        data: "AAA=".to_string(),
    };
    assert!(!transport.send(&audio));

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let mut server = servers.recv().await.unwrap();

    assert!(transport.send(&audio));
    assert!(transport.send(&ClientMessage::Stop));
    assert_eq!(server.recv().await.unwrap(), json!({"type": "audio", "data": "AAA="}));
    assert_eq!(server.recv().await.unwrap(), json!({"type": "stop"}));

    transport.disconnect();
    wait_status(&mut status, ConnectionState::Disconnected).await;
    assert!(!transport.send(&audio));
    // Client side closed
    assert!(server.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_messages_queued_before_disconnect_are_flushed() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector);
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let mut server = servers.recv().await.unwrap();

    assert!(transport.send(&ClientMessage::Stop));
    transport.disconnect();

    assert_eq!(server.recv().await.unwrap(), json!({"type": "stop"}));
    assert!(server.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exactly_five_reconnects_after_drop() {
    // First connection succeeds, every reconnect is refused
    let (connector, mut servers) = ScriptedConnector::new([Outcome::Accept], Outcome::Refuse);
    let (transport, _inbound) = Transport::spawn(transport_config(), connector.clone());
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let server = servers.recv().await.unwrap();

    drop(server);

    // Retries are spaced by the fixed two second delay
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempts(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(connector.attempts(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1 + 5);
    // Each refusal errors and then closes, so the spent budget rests on disconnected
    assert_eq!(transport.status(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_succeeds_after_socket_error() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector.clone());
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let server = servers.recv().await.unwrap();
    server.fail();

    let second = tokio::time::timeout(Duration::from_secs(10), servers.recv())
        .await
        .unwrap()
        .unwrap();
    wait_status(&mut status, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
    drop(second);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector.clone());
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    drop(servers.recv().await.unwrap());
    wait_status(&mut status, ConnectionState::Disconnected).await;

    // A retry is now scheduled two seconds out
    transport.disconnect();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(transport.status(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_twice_is_harmless() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector.clone());
    let mut status = transport.subscribe();

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    let _server = servers.recv().await.unwrap();

    transport.disconnect();
    transport.disconnect();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(transport.status(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 1);

    // A fresh connect still works afterwards
    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mark_recording() {
    let (connector, _servers) = ScriptedConnector::accepting();
    let (transport, _inbound) = Transport::spawn(transport_config(), connector);
    let mut status = transport.subscribe();

    transport.mark_recording();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.status(), ConnectionState::Disconnected);

    transport.connect();
    wait_status(&mut status, ConnectionState::Connected).await;
    transport.mark_recording();
    wait_status(&mut status, ConnectionState::Recording).await;
    assert!(transport.is_connected());
}

#[test]
fn test_control_message_kinds() {
    let message = ControlMessage::parse(r#"{"type":"search_code","code":"print(1)"}"#).unwrap();
    assert_eq!(message.kind(), "search_code");
}
