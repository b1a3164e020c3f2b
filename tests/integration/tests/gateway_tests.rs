//! Gateway session integration tests
//!
//! Drive a real `GatewayClient` against the in-memory `FakeGateway`.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use gateway_client::connection::ConnectionState;
use gateway_client::protocol::{PresenceUpdatePayload, RequestGuildMembersPayload};
use gateway_client::transport::{Frame, GatewayCompression};
use gateway_client::{GatewayClient, GatewayError, GatewayMessage, GatewayResult, OpCode};
use gateway_common::{GatewayIntents, ShardSpec};
use integration_tests::*;
use serde_json::json;

/// Cold connect through Hello, Identify and READY
async fn establish(gateway: &FakeGateway, client: &GatewayClient) -> ServerHandle {
    client.connect().await.expect("connect");
    let mut server = gateway.next_connection().await;
    server.send(&hello());
    server.expect_op(OpCode::Identify).await;
    server.send(&ready(1));
    wait_for_state(client, ConnectionState::Connected).await;
    server
}

/// Stand-in stream compression: frames travel byte-reversed
struct ReversingCompression;

impl GatewayCompression for ReversingCompression {
    fn identifier(&self) -> &str {
        "test-stream"
    }

    fn decompress(&self, bytes: &[u8]) -> GatewayResult<Vec<u8>> {
        Ok(bytes.iter().rev().copied().collect())
    }
}

fn compressed(message: &GatewayMessage) -> Frame {
    let json = message.to_json().unwrap();
    Frame::Binary(json.into_bytes().into_iter().rev().collect())
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_cold_connect_identifies() {
    let gateway = FakeGateway::new();
    let config = test_config().with_intents(GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES);
    let (client, failures) = gateway.client(config);
    let mut events = subscribe_all(&client);

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;

    assert_eq!(gateway.rest_calls(), 1);
    assert_eq!(server.url.host_str(), Some("gateway.test"));
    assert_eq!(server.query("v").as_deref(), Some("10"));
    assert_eq!(server.query("encoding").as_deref(), Some("json"));
    assert_eq!(server.query("compress"), None);
    wait_for_state(&client, ConnectionState::Handshaking).await;

    server.send(&hello());
    let identify = server.expect_op(OpCode::Identify).await;
    let payload = identify.d.unwrap();
    assert_eq!(payload["token"], TEST_TOKEN);
    assert_eq!(payload["intents"], (1 << 0) | (1 << 9));
    assert_eq!(payload["compress"], false);
    assert_eq!(payload["large_threshold"], 50);
    assert!(payload["properties"]["os"].is_string());
    assert!(payload.get("shard").is_none());
    assert_eq!(
        client.heartbeat_interval(),
        Some(Duration::from_millis(TEST_HEARTBEAT_INTERVAL_MS))
    );

    server.send(&ready(1));
    let ready_event = next_event(&mut events).await;
    assert_eq!(ready_event.name, "READY");

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());
    assert_eq!(client.session_id().as_deref(), Some(TEST_SESSION_ID));
    assert_eq!(client.sequence(), Some(1));
    assert!(client.can_resume());
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_identify_carries_shard() {
    let gateway = FakeGateway::new();
    let config = test_config().with_shard(ShardSpec::new(1, 2).unwrap());
    let (client, _failures) = gateway.client(config);

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;
    server.send(&hello());

    let identify = server.expect_op(OpCode::Identify).await;
    assert_eq!(identify.d.unwrap()["shard"], json!([1, 2]));

    server.send(&ready_with(1, json!({ "shard": [1, 2] })));
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(client.shard(), Some(ShardSpec { id: 1, count: 2 }));

    client.disconnect(true).await;
    assert_eq!(client.shard(), None);
}

#[tokio::test]
async fn test_missing_hello_times_out() {
    let gateway = FakeGateway::new();
    let config = test_config().with_startup_timeout(Duration::from_millis(100));
    let (client, failures) = gateway.client(config);

    client.connect().await.unwrap();
    let _server = gateway.next_connection().await;

    wait_for_state(&client, ConnectionState::Disconnected).await;
    let expected = GatewayError::StartupTimeout.to_string();
    assert_eq!(failures.messages(), vec![expected]);
}

#[tokio::test]
async fn test_unexpected_first_message_is_fatal() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());

    client.connect().await.unwrap();
    let server = gateway.next_connection().await;
    server.send(&GatewayMessage::heartbeat_ack());

    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert_eq!(failures.messages().len(), 1);
    assert!(failures.messages()[0].contains("Expected Hello"));
}

#[tokio::test]
async fn test_compressed_handshake() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client_with(test_config(), |builder| {
        builder.compression(Arc::new(ReversingCompression))
    });

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;
    assert_eq!(server.query("compress").as_deref(), Some("test-stream"));
    assert_eq!(server.query("encoding").as_deref(), Some("json"));

    server.send_frame(compressed(&hello()));
    server.expect_op(OpCode::Identify).await;
    server.send_frame(compressed(&ready(1)));

    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(client.session_id().as_deref(), Some(TEST_SESSION_ID));
    assert!(failures.is_empty());
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resumable_close_resumes_without_rest() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.send(&event("MESSAGE_CREATE", 42));
    wait_until(|| client.sequence() == Some(42)).await;

    server.close(4000);
    let mut resumed_server = gateway.next_connection().await;

    assert_eq!(resumed_server.url.host_str(), Some("resume.test"));
    assert_eq!(resumed_server.query("v").as_deref(), Some("10"));
    assert_eq!(gateway.rest_calls(), 1);

    let resume = resumed_server.expect_op(OpCode::Resume).await;
    let payload = resume.d.unwrap();
    assert_eq!(payload["session_id"], TEST_SESSION_ID);
    assert_eq!(payload["seq"], 42);
    assert_eq!(payload["token"], TEST_TOKEN);
    assert_eq!(client.state(), ConnectionState::Resuming);

    resumed_server.send(&resumed(43));
    wait_for_state(&client, ConnectionState::Connected).await;
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_resume_replays_in_order_after_resumed() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let mut events = subscribe_all(&client);
    let server = establish(&gateway, &client).await;
    assert_eq!(next_event(&mut events).await.name, "READY");

    server.close(4009);
    let mut resumed_server = gateway.next_connection().await;
    resumed_server.expect_op(OpCode::Resume).await;

    resumed_server.send(&event("MESSAGE_CREATE", 2));
    resumed_server.send(&GatewayMessage::heartbeat_ack());
    resumed_server.send(&event("MESSAGE_UPDATE", 3));
    resumed_server.send(&event("MESSAGE_DELETE", 4));

    // Nothing reaches subscribers before RESUMED
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.receiver.try_recv().is_err());
    assert_eq!(client.sequence(), Some(4));

    resumed_server.send(&resumed(5));
    resumed_server.send(&event("TYPING_START", 6));

    let mut names = Vec::new();
    for _ in 0..5 {
        names.push(next_event(&mut events).await.name);
    }
    assert_eq!(
        names,
        [
            "RESUMED",
            "MESSAGE_CREATE",
            "MESSAGE_UPDATE",
            "MESSAGE_DELETE",
            "TYPING_START"
        ]
    );
}

#[tokio::test]
async fn test_disconnect_keeps_session_for_resume() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let _server = establish(&gateway, &client).await;

    client.disconnect(true).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());
    assert!(client.can_resume());

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;
    let resume = server.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d.unwrap()["seq"], 1);
    assert_eq!(gateway.rest_calls(), 1);
}

#[tokio::test]
async fn test_fresh_connect_discards_session() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let _server = establish(&gateway, &client).await;

    client.reconnect(false, true).await.unwrap();
    let mut server = gateway.next_connection().await;

    assert!(!client.can_resume());
    assert_eq!(gateway.rest_calls(), 2);
    server.send(&hello());
    server.expect_op(OpCode::Identify).await;
}

// ============================================================================
// Server-initiated reconnects and closures
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_terminal() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.close(4004);
    wait_for_state(&client, ConnectionState::Disconnected).await;

    assert!(!client.can_resume());
    assert_eq!(client.session_id(), None);
    assert_eq!(client.sequence(), None);
    assert!(gateway.connection_within(Duration::from_millis(200)).await.is_none());
    assert_eq!(gateway.connects(), 1);

    let messages = failures.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("4004"));
}

#[tokio::test]
async fn test_abnormal_closure_resumes() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.close(1006);
    let mut next = gateway.next_connection().await;

    let resume = next.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d.unwrap()["session_id"], TEST_SESSION_ID);
    assert_eq!(next.url.host_str(), Some("resume.test"));
    assert_eq!(gateway.rest_calls(), 1);
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_read_failure_resumes() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.fail("connection reset by peer");
    let mut next = gateway.next_connection().await;

    let resume = next.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d.unwrap()["seq"], 1);
    next.send(&resumed(2));
    wait_for_state(&client, ConnectionState::Connected).await;
    assert!(client.can_resume());
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_reconnect_opcode_resumes() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.send(&GatewayMessage::reconnect());
    let mut next = gateway.next_connection().await;

    let resume = next.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d.unwrap()["session_id"], TEST_SESSION_ID);
    assert_eq!(gateway.rest_calls(), 1);
    assert_eq!(gateway.max_open(), 1);
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_invalid_session_resumable() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.send(&GatewayMessage::invalid_session(true));
    let mut next = gateway.next_connection().await;

    next.expect_op(OpCode::Resume).await;
    assert_eq!(gateway.rest_calls(), 1);
}

#[tokio::test]
async fn test_invalid_session_not_resumable_identifies_again() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.send(&GatewayMessage::invalid_session(false));
    let mut next = gateway.next_connection().await;

    assert_eq!(next.url.host_str(), Some("gateway.test"));
    assert_eq!(gateway.rest_calls(), 2);
    assert!(!client.can_resume());

    next.send(&hello());
    next.expect_op(OpCode::Identify).await;
    next.send(&ready(1));
    wait_for_state(&client, ConnectionState::Connected).await;
    assert!(client.can_resume());
}

#[tokio::test]
async fn test_unknown_opcode_is_ignored() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let mut events = subscribe_all(&client);
    let server = establish(&gateway, &client).await;
    next_event(&mut events).await;

    server.send_raw(r#"{"op":42,"d":null}"#);
    server.send(&event("GUILD_CREATE", 2));

    assert_eq!(next_event(&mut events).await.name, "GUILD_CREATE");
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(failures.is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_connects_open_one_connection() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());

    let attempts = (0..5).map(|_| {
        let client = client.clone();
        async move { client.connect().await }
    });
    for result in futures::future::join_all(attempts).await {
        result.unwrap();
    }

    assert_eq!(gateway.connects(), 1);
    assert_eq!(gateway.max_open(), 1);
    assert_eq!(gateway.rest_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_reconnects_never_overlap() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    client.connect().await.unwrap();

    let attempts = (0..4).map(|_| {
        let client = client.clone();
        async move { client.reconnect(true, false).await }
    });
    for result in futures::future::join_all(attempts).await {
        result.unwrap();
    }

    assert_eq!(gateway.connects(), 5);
    assert_eq!(gateway.max_open(), 1);
    assert!(client.is_connected());
}

// ============================================================================
// Sequence, heartbeat and outbound traffic
// ============================================================================

#[tokio::test]
async fn test_sequence_follows_wire_order() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let mut events = subscribe_all(&client);
    let server = establish(&gateway, &client).await;
    next_event(&mut events).await;

    let mut observed = Vec::new();
    for seq in [3, 7, 5] {
        server.send(&event("MESSAGE_CREATE", seq));
        next_event(&mut events).await;
        observed.push(client.sequence());
    }

    assert_eq!(observed, vec![Some(3), Some(7), Some(5)]);
}

#[tokio::test]
async fn test_server_heartbeat_request_and_ack() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let mut server = establish(&gateway, &client).await;

    server.send(&GatewayMessage::heartbeat(None));
    let heartbeat = server.expect_op(OpCode::Heartbeat).await;
    assert_eq!(heartbeat.d, Some(json!(1)));

    server.send(&GatewayMessage::heartbeat_ack());
    wait_until(|| client.latency().is_some()).await;
}

#[tokio::test]
async fn test_unacknowledged_heartbeats_resume_once() {
    let gateway = FakeGateway::new();
    let config = test_config().with_heartbeat_tolerance(Duration::from_millis(50), 3);
    let (client, failures) = gateway.client(config);

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;
    server.send(&GatewayMessage::hello(200));
    server.expect_op(OpCode::Identify).await;
    server.send(&ready(1));
    wait_for_state(&client, ConnectionState::Connected).await;

    // No acks on the first connection
    let mut resumed_server = gateway.next_connection().await;
    resumed_server.expect_op(OpCode::Resume).await;
    resumed_server.send(&resumed(2));

    let (acked, extra) = tokio::join!(
        resumed_server.ack_heartbeats_for(Duration::from_millis(600)),
        gateway.connection_within(Duration::from_millis(600)),
    );

    assert!(acked >= 1);
    assert!(extra.is_none());
    assert_eq!(gateway.connects(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.latency().is_some());
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_hello_after_handshake_updates_interval() {
    let gateway = FakeGateway::new();
    let (client, failures) = gateway.client(test_config());
    let server = establish(&gateway, &client).await;

    server.send(&GatewayMessage::hello(60_000));
    wait_until(|| client.heartbeat_interval() == Some(Duration::from_secs(60))).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_outbound_helpers() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());
    let mut server = establish(&gateway, &client).await;

    client
        .update_presence(&PresenceUpdatePayload::new("idle"))
        .await
        .unwrap();
    let presence = server.expect_op(OpCode::PresenceUpdate).await;
    assert_eq!(presence.d.unwrap()["status"], "idle");

    client
        .request_guild_members(&RequestGuildMembersPayload::all("123"))
        .await
        .unwrap();
    let request = server.expect_op(OpCode::RequestGuildMembers).await;
    assert_eq!(request.d.unwrap()["guild_id"], "123");

    let invalid = client
        .update_presence(&PresenceUpdatePayload::new("busy"))
        .await;
    assert!(matches!(invalid, Err(GatewayError::Encode(_))));
    assert!(server.is_quiet_for(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_send_requires_connection() {
    let gateway = FakeGateway::new();
    let (client, _failures) = gateway.client(test_config());

    let result = client
        .update_presence(&PresenceUpdatePayload::new("online"))
        .await;
    assert!(matches!(result, Err(GatewayError::NotConnected)));
}

#[tokio::test]
async fn test_outbound_limit_delays_sends() {
    let gateway = FakeGateway::new();
    let config = test_config().with_outbound_limit(3, Duration::from_millis(300));
    let (client, _failures) = gateway.client(config);

    client.connect().await.unwrap();
    let mut server = gateway.next_connection().await;
    server.send(&hello());
    server.expect_op(OpCode::Identify).await;
    server.send(&ready(1));
    wait_for_state(&client, ConnectionState::Connected).await;

    // Identify used one slot of the window
    let start = tokio::time::Instant::now();
    for _ in 0..3 {
        client
            .update_presence(&PresenceUpdatePayload::new("online"))
            .await
            .unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(200));
    for _ in 0..3 {
        server.expect_op(OpCode::PresenceUpdate).await;
    }
}
