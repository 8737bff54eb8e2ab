use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use relay_core::{AccessToken, ExportFormat, ExportRequest, ResultProblem};
use relay_engine::{build_client, ExportDriver, ExportError, HttpSettings, PollSettings};
use serde_json::json;
use url::Url;
use wiremock::matchers::{bearer_token, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_poll(max_attempts: u32) -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(20),
        max_attempts,
    }
}

fn driver(server: &MockServer, poll: PollSettings) -> ExportDriver {
    let client = build_client(&HttpSettings::default()).unwrap();
    ExportDriver::new(client, &Url::parse(&server.uri()).unwrap(), poll).unwrap()
}

fn request(pages: Option<&str>) -> ExportRequest {
    ExportRequest {
        design_id: "D1".to_string(),
        format: ExportFormat::jpg(100).unwrap(),
        pages: pages.map(|p| p.parse().unwrap()),
    }
}

fn token() -> AccessToken {
    AccessToken::new("tok1")
}

async fn mount_submit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/exports"))
        .and(bearer_token("tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "in_progress" }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn submits_then_polls_until_success() {
    relay_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exports"))
        .and(bearer_token("tok1"))
        .and(body_json(json!({
            "design_id": "D1",
            "format": { "type": "jpg", "quality": 100 },
            "pages": [1, 2]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "in_progress" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .and(bearer_token("tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "in_progress" }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "success", "urls": ["u1", "u2"] }
        })))
        .mount(&server)
        .await;

    let outcome = driver(&server, fast_poll(5))
        .export_design(&token(), &request(Some("1,2")))
        .await
        .unwrap();
    assert_eq!(outcome.job_id, "job-1");
    assert_eq!(outcome.urls, vec!["u1".to_string(), "u2".to_string()]);
    assert_eq!(outcome.polls, 2);
}

#[tokio::test]
async fn success_on_submission_skips_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-9", "status": "success", "urls": ["only"] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap();
    assert_eq!(outcome.urls, vec!["only".to_string()]);
    assert_eq!(outcome.polls, 0);
}

#[tokio::test]
async fn submission_rejection_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exports"))
        .respond_with(ResponseTemplate::new(403).set_body_string("missing scope"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();
    match &err {
        ExportError::Submit { status, body } => {
            assert_eq!(*status, 403);
            assert_eq!(body, "missing scope");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn failed_job_surfaces_reason() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": {
                "id": "job-1",
                "status": "failed",
                "error": { "code": "license_required", "message": "Design uses premium elements" }
            }
        })))
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();
    match err {
        ExportError::JobFailed { job_id, reason } => {
            assert_eq!(job_id, "job-1");
            assert_eq!(reason, "Design uses premium elements");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn failed_job_without_message_uses_code() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "failed", "error": { "code": "internal_failure" } }
        })))
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::JobFailed { ref reason, .. } if reason == "internal_failure"
    ));
}

#[tokio::test]
async fn times_out_after_attempt_budget() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "in_progress" }
        })))
        .expect(3)
        .mount(&server)
        .await;

    let poll = fast_poll(3);
    let started = Instant::now();
    let err = driver(&server, poll)
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();

    match &err {
        ExportError::Timeout {
            job_id, attempts, ..
        } => {
            assert_eq!(job_id, "job-1");
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(started.elapsed() >= poll.budget());
    assert!(started.elapsed() < poll.budget() + Duration::from_secs(5));
}

#[tokio::test]
async fn url_count_disagreeing_with_pages_is_rejected() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": { "id": "job-1", "status": "success", "urls": ["u1"] }
        })))
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(Some("1,2")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::InvalidResult {
            problem: ResultProblem::PageCountMismatch {
                expected: 2,
                actual: 1
            },
            ..
        }
    ));
}

#[tokio::test]
async fn poll_server_error_is_retryable() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/exports/job-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Poll { status: 502, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn submission_without_job_id_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job": {} })))
        .mount(&server)
        .await;

    let err = driver(&server, fast_poll(5))
        .export_design(&token(), &request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Decode(_)));
}
