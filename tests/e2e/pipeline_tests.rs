//! Detection ingestion through to WebSocket delivery.

use super::{local_config, TestHarness};
use axum::extract::Multipart;
use axum::routing::post;
use axum::{Json, Router};
use plate_verifier::registry::RegistryClient;
use plate_verifier::ServiceEvent;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_registered_plate_reaches_subscriber() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");

    let reply = harness
        .submit("req-1", &[("ab-123", 0.92)])
        .await
        .expect("submit");
    assert_eq!(reply.request_id, "req-1");
    assert!(reply.outcomes[0].accepted);
    assert_eq!(reply.outcomes[0].plate.as_deref(), Some("AB123"));

    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["type"], "verification");
    assert_eq!(frame["plate"], "AB123");
    assert_eq!(frame["status"], "registered");
    assert_eq!(frame["confidence"], 0.92);
    assert_eq!(
        frame["registryOwner"],
        "0x00000000000000000000000000000000000000aa"
    );

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_each_status_is_reported() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");

    for (i, plate) in ["CD 456", "ef-789", "ZZ999"].iter().enumerate() {
        harness
            .submit(&format!("req-{i}"), &[(*plate, 0.8)])
            .await
            .expect("submit");
        let frame = client.next_json().await.expect("verification");
        let expected = ["revoked", "expired", "unknown"][i];
        assert_eq!(frame["status"], expected, "{plate}");
    }

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_status_filter_only_delivers_matching_results() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client
        .subscribe(json!({"status": "registered"}))
        .await
        .expect("subscribe");

    harness
        .submit("req-1", &[("ZZ999", 0.9), ("CD456", 0.9)])
        .await
        .expect("submit");
    harness
        .submit("req-2", &[("AB123", 0.9)])
        .await
        .expect("submit");

    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["plate"], "AB123");
    assert_eq!(frame["status"], "registered");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_duplicate_request_is_rejected() {
    let harness = TestHarness::setup().await.expect("setup");

    let first = harness.submit("dup", &[("AB123", 0.9)]).await.expect("first");
    assert!(first.outcomes[0].accepted);

    let second = harness.submit("dup", &[("AB123", 0.9)]).await.expect("second");
    assert!(!second.outcomes[0].accepted);
    assert!(second.outcomes[0]
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("duplicate"));

    let stats = harness.stats().await.expect("stats");
    assert_eq!(stats["accepted"], 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_invalid_readings_are_rejected_individually() {
    let harness = TestHarness::setup().await.expect("setup");

    let reply = harness
        .submit("mixed", &[("", 0.5), ("AB123", 1.5), ("AB123", 0.5)])
        .await
        .expect("submit");
    let accepted: Vec<bool> = reply.outcomes.iter().map(|o| o.accepted).collect();
    assert_eq!(accepted, vec![false, false, true]);
    assert_eq!(reply.outcomes[0].reason.as_deref(), Some("plate is empty"));

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_stats_report_cache_and_hub() {
    let harness = TestHarness::setup().await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");

    harness.submit("a", &[("AB123", 0.9)]).await.expect("submit");
    client.next_json().await.expect("first");
    harness.submit("b", &[("AB123", 0.9)]).await.expect("submit");
    client.next_json().await.expect("second");

    let stats = harness.stats().await.expect("stats");
    assert_eq!(stats["accepted"], 2);
    assert_eq!(stats["cache"]["misses"], 1);
    assert_eq!(stats["cache"]["hits"], 1);
    assert_eq!(stats["cacheEntries"], 1);
    assert_eq!(stats["hub"]["sessions"], 1);
    assert_eq!(stats["hub"]["subscriptions"], 1);
    assert_eq!(stats["hub"]["deliveries"], 2);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_verified_detections_are_announced() {
    let mut harness = TestHarness::setup().await.expect("setup");
    let mut events = harness.events().expect("events");

    harness.submit("ev", &[("AB123", 0.9)]).await.expect("submit");

    let verified = tokio::time::timeout(super::harness::STEP_TIMEOUT, async {
        loop {
            if let ServiceEvent::DetectionVerified { plate, status, .. } =
                events.recv().await.expect("event")
            {
                return (plate, status);
            }
        }
    })
    .await
    .expect("event in time");
    assert_eq!(verified.0, "AB123");
    assert_eq!(verified.1.as_str(), "registered");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_detect_without_detector_is_unavailable() {
    let harness = TestHarness::setup().await.expect("setup");

    let form = reqwest::multipart::Form::new()
        .part("image", reqwest::multipart::Part::bytes(vec![1, 2, 3]).file_name("car.jpg"));
    let response = harness
        .http()
        .post(format!("{}/detect", harness.base_url()))
        .multipart(form)
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    harness.teardown().await.expect("teardown");
}

async fn fake_detector(mut multipart: Multipart) -> Json<serde_json::Value> {
    while let Some(field) = multipart.next_field().await.expect("field") {
        let _ = field.bytes().await.expect("bytes");
    }
    Json(json!({
        "detections": [
            {"coordinates": [0, 0, 10, 10], "confidence": 0.95},
            {"coordinates": [5, 5, 50, 20], "confidence": 0.88, "text": "AB 123"}
        ],
        "result_image": "detected_plate.jpg"
    }))
}

#[tokio::test]
async fn test_detect_forwards_image_and_ingests_plates() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let detector_addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, Router::new().route("/detect", post(fake_detector))).await;
    });

    let mut config = local_config();
    config.detector.url = Some(format!("http://{detector_addr}/detect"));
    let registry: Arc<dyn RegistryClient> = Arc::new(super::default_registry());
    let harness = TestHarness::setup_with(config, Some(registry))
        .await
        .expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({})).await.expect("subscribe");

    let form = reqwest::multipart::Form::new().part(
        "image",
        reqwest::multipart::Part::bytes(vec![0xff, 0xd8, 0xff])
            .file_name("car.jpg")
            .mime_str("image/jpeg")
            .expect("mime"),
    );
    let reply: serde_json::Value = harness
        .http()
        .post(format!("{}/detect", harness.base_url()))
        .multipart(form)
        .send()
        .await
        .expect("send")
        .error_for_status()
        .expect("status")
        .json()
        .await
        .expect("json");

    assert_eq!(reply["detector"]["detections"].as_array().map(Vec::len), Some(2));
    assert_eq!(reply["detector"]["result_image"], "detected_plate.jpg");
    let outcomes = reply["outcomes"].as_array().expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["index"], 1);
    assert_eq!(outcomes[0]["plate"], "AB123");

    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["plate"], "AB123");
    assert_eq!(frame["status"], "registered");
    assert_eq!(frame["confidence"], 0.88);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_registry_fixtures_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("plates.json");
    std::fs::write(
        &path,
        r#"{"xy-42": {"owner": "0x01", "status": "revoked", "asOfBlock": 3}}"#,
    )
    .expect("write");

    let mut config = local_config();
    config.registry.kind = plate_verifier::config::RegistryKind::Static;
    config.registry.static_records = Some(path);
    let harness = TestHarness::setup_with(config, None).await.expect("setup");
    let mut client = harness.connect().await.expect("connect");
    client.subscribe(json!({"platePrefix": "xy"})).await.expect("subscribe");

    harness.submit("fx", &[("XY 42", 0.6)]).await.expect("submit");
    let frame = client.next_json().await.expect("verification");
    assert_eq!(frame["status"], "revoked");

    harness.teardown().await.expect("teardown");
}
