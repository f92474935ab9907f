// Integration tests for the HTTP control surface

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{scripted_capture, TestCall};
use serde_json::{json, Value};
use tower::ServiceExt;
use voice_call::call::CallConfig;
use voice_call::{create_router, AppState};

fn router(t: &TestCall, mute_enabled: bool) -> Router {
    create_router(AppState::new(t.call.clone(), mute_enabled))
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(start_paused = true)]
async fn test_health_check() {
    let t = TestCall::spawn(CallConfig::default(), scripted_capture(0));
    let response = router(&t, false)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test(start_paused = true)]
async fn test_idle_call_snapshot() {
    let t = TestCall::spawn(CallConfig::default(), scripted_capture(0));
    let (status, body) = request(&router(&t, false), "GET", "/call", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["status_text"], "Disconnected");
    assert_eq!(body["is_open"], false);
    assert_eq!(body["elapsed"], "00:00");
    assert!(body["speaker"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_send_text_validation() {
    let t = TestCall::spawn(CallConfig::default(), scripted_capture(0));
    let app = router(&t, false);

    let (status, body) = request(&app, "POST", "/call/text", Some(json!({"text": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Text must not be empty");

    let (status, body) = request(&app, "POST", "/call/text", Some(json!({"text": "hello"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Call is not connected");
}

#[tokio::test(start_paused = true)]
async fn test_call_lifecycle_over_http() {
    let mut t = TestCall::spawn(CallConfig::default(), scripted_capture(0));
    let app = router(&t, false);

    let (status, body) = request(&app, "POST", "/call/open", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_open"], true);
    assert!(body["call_id"].is_string());

    let mut server = t.next_server().await;
    t.wait_for("recording", |s| s.is_capturing).await;

    let (status, body) = request(&app, "POST", "/call/mute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"muted": false, "enabled": false}));

    let (status, body) = request(&app, "POST", "/call/text", Some(json!({"text": " hi there "}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"sent": true}));
    assert_eq!(
        server.recv().await.unwrap(),
        json!({"type": "text", "data": "hi there"})
    );

    let (status, body) = request(&app, "POST", "/call/end", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "ended");
    assert_eq!(body["is_open"], false);
    assert_eq!(server.recv().await.unwrap(), json!({"type": "stop"}));
}

#[tokio::test(start_paused = true)]
async fn test_transcript_endpoint() {
    let mut t = TestCall::spawn(CallConfig::default(), scripted_capture(0));
    let app = router(&t, false);

    let (_, body) = request(&app, "GET", "/call/transcript", None).await;
    assert_eq!(body, json!([]));

    request(&app, "POST", "/call/open", None).await;
    let server = t.next_server().await;
    t.wait_for("recording", |s| s.is_capturing).await;

    server.send(json!({"type": "text", "data": "Hello!"}));
    server.send(json!({"type": "turn_complete"}));
    t.wait_for("turn", |s| s.counters.turns_completed == 1).await;

    let (status, body) = request(&app, "GET", "/call/transcript", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["role"], "assistant");
    assert_eq!(entries[0]["text"], "Hello!");
}

#[tokio::test(start_paused = true)]
async fn test_mute_reports_enabled_flag() {
    let config = CallConfig {
        mute_enabled: true,
        ..Default::default()
    };
    let t = TestCall::spawn(config, scripted_capture(0));
    let app = router(&t, true);

    let (_, body) = request(&app, "POST", "/call/mute", None).await;
    assert_eq!(body, json!({"muted": true, "enabled": true}));
    let (_, body) = request(&app, "POST", "/call/mute", None).await;
    assert_eq!(body, json!({"muted": false, "enabled": true}));
}
