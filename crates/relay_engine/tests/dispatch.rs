use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use relay_core::{BatchPolicy, Recipient, TextPlacement};
use relay_engine::{
    build_client, DeliveryError, DispatchSettings, HttpSettings, MessageDispatcher, StampFn,
};
use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn counting_stamp() -> StampFn {
    let counter = Arc::new(AtomicU64::new(1000));
    Arc::new(move || counter.fetch_add(1, Ordering::SeqCst).to_string())
}

fn dispatcher(server: &MockServer, settings: DispatchSettings) -> MessageDispatcher {
    let client = build_client(&HttpSettings::default()).unwrap();
    MessageDispatcher::new(
        client,
        &Url::parse(&server.uri()).unwrap(),
        "line-token",
        settings,
        counting_stamp(),
    )
    .unwrap()
}

fn images(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("https://cdn.example.com/p{i}.jpg")).collect()
}

async fn mount_ok(server: &MockServer, route: &str) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(bearer_token("line-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn sent_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| serde_json::from_slice(&req.body).unwrap())
        .collect()
}

#[tokio::test]
async fn broadcast_images_without_text_in_input_order() {
    relay_logging::initialize_for_tests();
    let server = MockServer::start().await;
    mount_ok(&server, "/v2/bot/message/broadcast").await;

    let settings = DispatchSettings {
        cache_defeat: false,
        ..DispatchSettings::default()
    };
    let report = dispatcher(&server, settings)
        .dispatch(None, &["u1".to_string(), "u2".to_string()], &Recipient::Broadcast)
        .await
        .unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.dropped_images, 0);

    let bodies = sent_bodies(&server).await;
    assert_eq!(
        bodies,
        vec![json!({
            "messages": [
                { "type": "image", "originalContentUrl": "u1", "previewImageUrl": "u1" },
                { "type": "image", "originalContentUrl": "u2", "previewImageUrl": "u2" }
            ]
        })]
    );
}

#[tokio::test]
async fn oversized_batch_keeps_text_and_first_images() {
    let server = MockServer::start().await;
    mount_ok(&server, "/v2/bot/message/broadcast").await;

    let report = dispatcher(&server, DispatchSettings::default())
        .dispatch(Some("hello"), &images(6), &Recipient::Broadcast)
        .await
        .unwrap();
    assert_eq!(report.sent, 5);
    assert_eq!(report.dropped_images, 2);

    let bodies = sent_bodies(&server).await;
    let messages = bodies[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0], json!({ "type": "text", "text": "hello" }));
    for (idx, message) in messages[1..].iter().enumerate() {
        let url = message["originalContentUrl"].as_str().unwrap();
        assert_eq!(
            url,
            format!("https://cdn.example.com/p{}.jpg?cb=1000-{}", idx + 1, idx + 1)
        );
        assert_eq!(message["previewImageUrl"], message["originalContentUrl"]);
    }
}

#[tokio::test]
async fn push_addresses_the_recipient() {
    let server = MockServer::start().await;
    mount_ok(&server, "/v2/bot/message/push").await;

    let settings = DispatchSettings {
        policy: BatchPolicy {
            text_placement: TextPlacement::After,
            ..BatchPolicy::default()
        },
        cache_defeat: false,
    };
    dispatcher(&server, settings)
        .dispatch(Some("caption"), &images(1), &Recipient::Push("U123".to_string()))
        .await
        .unwrap();

    let bodies = sent_bodies(&server).await;
    assert_eq!(bodies[0]["to"], json!("U123"));
    assert_eq!(bodies[0]["messages"][0]["type"], json!("image"));
    assert_eq!(bodies[0]["messages"][1], json!({ "type": "text", "text": "caption" }));
}

#[tokio::test]
async fn repeated_dispatches_use_distinct_image_urls() {
    let server = MockServer::start().await;
    mount_ok(&server, "/v2/bot/message/broadcast").await;

    let dispatcher = dispatcher(&server, DispatchSettings::default());
    let urls = images(2);
    dispatcher
        .dispatch(None, &urls, &Recipient::Broadcast)
        .await
        .unwrap();
    dispatcher
        .dispatch(None, &urls, &Recipient::Broadcast)
        .await
        .unwrap();

    let bodies = sent_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    for idx in 0..2 {
        assert_ne!(
            bodies[0]["messages"][idx]["originalContentUrl"],
            bodies[1]["messages"][idx]["originalContentUrl"]
        );
    }
}

#[tokio::test]
async fn rejection_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/broadcast"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"message\":\"bad\"}"))
        .mount(&server)
        .await;

    let err = dispatcher(&server, DispatchSettings::default())
        .dispatch(Some("hi"), &[], &Recipient::Broadcast)
        .await
        .unwrap_err();
    match &err {
        DeliveryError::Rejected { status, body } => {
            assert_eq!(*status, 400);
            assert_eq!(body, "{\"message\":\"bad\"}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn empty_batch_and_blank_recipient_fail_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, DispatchSettings::default());
    let err = dispatcher
        .dispatch(None, &[], &Recipient::Broadcast)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Batch(_)));

    let err = dispatcher
        .dispatch(Some("hi"), &[], &Recipient::Push(" ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::InvalidRecipient));
}
