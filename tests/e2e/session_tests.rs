//! WebSocket session behavior over real connections.

use super::{default_registry, local_config, TestHarness};
use plate_verifier::registry::RegistryClient;
use plate_verifier::ServiceEvent;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn wait_for_sessions(harness: &TestHarness, expected: u64) -> Value {
    for _ in 0..100 {
        let stats = harness.stats().await.expect("stats");
        if stats["hub"]["sessions"] == expected {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session count never reached {expected}");
}

#[tokio::test]
async fn test_unsubscribe_stops_deliveries() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    let id = client.subscribe(json!({})).await.expect("subscribe");

    client
        .send_json(&json!({"type": "unsubscribe", "id": id}))
        .await
        .expect("send");
    let reply = client.next_json().await.expect("reply");
    assert_eq!(reply["type"], "unsubscribed");
    assert_eq!(reply["id"], id.as_str());
    assert_eq!(reply["removed"], true);

    client
        .send_json(&json!({"type": "unsubscribe", "id": id}))
        .await
        .expect("send");
    let again = client.next_json().await.expect("reply");
    assert_eq!(again["removed"], false);

    // A second subscription proves the first no longer delivers.
    client
        .subscribe(json!({"status": "revoked"}))
        .await
        .expect("subscribe");
    harness
        .submit("u", &[("AB123", 0.9), ("CD456", 0.9)])
        .await
        .expect("submit");
    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["plate"], "CD456");

    let stats = harness.stats().await.expect("stats");
    assert_eq!(stats["hub"]["subscriptions"], 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_each_session_gets_one_copy() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut first = harness.connect().await.expect("connect");
    let mut second = harness.connect().await.expect("connect");
    assert_ne!(first.session_id(), second.session_id());

    first.subscribe(json!({})).await.expect("subscribe");
    first
        .subscribe(json!({"platePrefix": "AB"}))
        .await
        .expect("subscribe");
    second
        .subscribe(json!({"minConfidence": 0.95}))
        .await
        .expect("subscribe");

    harness
        .submit("fan", &[("AB123", 0.9), ("CD456", 0.97)])
        .await
        .expect("submit");

    let mut plates = vec![
        first.next_json().await.expect("first")["plate"].clone(),
        first.next_json().await.expect("first")["plate"].clone(),
    ];
    plates.sort_by_key(|p| p.as_str().unwrap_or_default().to_string());
    assert_eq!(plates, vec![json!("AB123"), json!("CD456")]);

    let only = second.next_json().await.expect("second");
    assert_eq!(only["plate"], "CD456");

    let stats = harness.stats().await.expect("stats");
    assert_eq!(stats["hub"]["deliveries"], 3);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_malformed_messages_close_session() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");

    for _ in 0..5 {
        client
            .send_json(&json!({"type": "launch"}))
            .await
            .expect("send");
        let reply = client.next_json().await.expect("error frame");
        assert_eq!(reply["type"], "error");
    }

    client
        .send_json(&json!({"type": "subscribe", "filter": {"status": "stolen"}}))
        .await
        .expect("send");
    client.wait_closed().await.expect("closed");

    wait_for_sessions(&harness, 0).await;
    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_subscription_limit_reports_error() {
    let mut config = local_config();
    config.hub.max_subscriptions_per_session = 2;
    let registry: Arc<dyn RegistryClient> = Arc::new(default_registry());
    let harness = TestHarness::setup_with(config, Some(registry))
        .await
        .expect("setup");
    let mut client = harness.connect().await.expect("connect");

    client.subscribe(json!({})).await.expect("first");
    client.subscribe(json!({})).await.expect("second");
    client
        .send_json(&json!({"type": "subscribe"}))
        .await
        .expect("send");
    let reply = client.next_json().await.expect("reply");
    assert_eq!(reply["type"], "error");

    let stats = harness.stats().await.expect("stats");
    assert_eq!(stats["hub"]["subscriptions"], 2);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_client_disconnect_removes_session() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");
    wait_for_sessions(&harness, 1).await;

    client.close().await.expect("close");
    let stats = wait_for_sessions(&harness, 0).await;
    assert_eq!(stats["hub"]["subscriptions"], 0);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let mut config = local_config();
    config.session.heartbeat_interval = Duration::from_millis(100);
    config.session.heartbeat_timeout = Duration::from_millis(300);
    let registry: Arc<dyn RegistryClient> = Arc::new(default_registry());
    let mut harness = TestHarness::setup_with(config, Some(registry))
        .await
        .expect("setup");
    let mut events = harness.events().expect("events");
    let mut client = harness.connect().await.expect("connect");

    let mut pings = 0;
    loop {
        match client.next_frame().await.expect("frame") {
            Some(Message::Text(text)) if text.as_str().contains("\"ping\"") => pings += 1,
            None | Some(Message::Close(_)) => break,
            Some(_) => {}
        }
    }
    assert!(pings >= 1);

    let reason = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ServiceEvent::SessionClosed { reason, .. } = events.recv().await.expect("event") {
                return reason;
            }
        }
    })
    .await
    .expect("closed event");
    assert_eq!(reason, "heartbeat timeout");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_answering_pings_keeps_session_alive() {
    let mut config = local_config();
    config.session.heartbeat_interval = Duration::from_millis(100);
    config.session.heartbeat_timeout = Duration::from_millis(300);
    let registry: Arc<dyn RegistryClient> = Arc::new(default_registry());
    let harness = TestHarness::setup_with(config, Some(registry))
        .await
        .expect("setup");
    let mut client = harness.connect().await.expect("connect");

    let until = tokio::time::Instant::now() + Duration::from_secs(1);
    let mut pongs = 0;
    while tokio::time::Instant::now() < until {
        match client.next_frame().await.expect("frame") {
            Some(Message::Text(text)) if text.as_str().contains("\"ping\"") => {
                client.send_json(&json!({"type": "pong"})).await.expect("pong");
                pongs += 1;
            }
            None | Some(Message::Close(_)) => panic!("session closed while answering pings"),
            Some(_) => {}
        }
    }
    assert!(pongs >= 5);
    assert_eq!(harness.stats().await.expect("stats")["hub"]["sessions"], 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");

    harness.submit("late", &[("AB123", 0.9)]).await.expect("submit");
    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["plate"], "AB123");

    harness.teardown().await.expect("teardown");
    client.wait_closed().await.expect("closed");
}

#[tokio::test]
async fn test_binary_frames_are_protocol_errors() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");

    client
        .send_raw(Message::binary(vec![1u8, 2, 3]))
        .await
        .expect("send");
    let reply = client.next_json().await.expect("reply");
    assert_eq!(reply["type"], "error");

    // The error streak resets after a valid message.
    client.subscribe(json!({})).await.expect("subscribe");

    harness.teardown().await.expect("teardown");
}
