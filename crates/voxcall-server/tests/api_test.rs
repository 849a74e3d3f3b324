mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_bytes, body_json, empty_request, incoming, json_request, TestServer};
use serde_json::json;
use tower::ServiceExt; // for oneshot
use voxcall_speech::testing::ScriptedSynthesizer;
use voxcall_types::CallState;

#[tokio::test]
async fn test_health_reports_version() {
    let server = TestServer::new();

    let response = server
        .app()
        .oneshot(empty_request("GET", "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_callback_answers_incoming_call() {
    let server = TestServer::new();
    let app = server.app();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/calling/callback", &incoming("call-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        body_json(response).await,
        json!({"outcomes": [{"outcome": "recognizing", "callId": "call-1"}]})
    );
    assert_eq!(server.recognizer.open_count(), 1);

    let response = app.oneshot(empty_request("GET", "/api/calls")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let calls = body_json(response).await;
    assert_eq!(calls[0]["callId"], "call-1");
    assert_eq!(calls[0]["tenantId"], "tenant-1");
    assert_eq!(calls[0]["state"], "recognizing");
    assert!(calls[0]["createdAt"].is_string());
    assert!(calls[0].get("finishedAt").is_none());
}

#[tokio::test]
async fn test_callback_reports_ignored_notifications() {
    let server = TestServer::new();

    let batch = json!({"value": [
        {"changeType": "updated", "resourceData": {"id": "call-2", "state": "established"}},
        {"changeType": "created"}
    ]});
    let response = server
        .app()
        .oneshot(json_request("POST", "/api/calling/callback", &batch))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        body_json(response).await,
        json!({"outcomes": [
            {"outcome": "ignored", "reason": "not_created", "callId": "call-2"},
            {"outcome": "ignored", "reason": "missing_resource"}
        ]})
    );
}

#[tokio::test]
async fn test_callback_with_empty_batch_is_accepted() {
    let server = TestServer::new();

    let response = server
        .app()
        .oneshot(json_request("POST", "/api/calling/callback", &json!({"value": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await, json!({"outcomes": []}));
}

#[tokio::test]
async fn test_callback_rejects_malformed_json() {
    let server = TestServer::new();

    let request = Request::builder()
        .method("POST")
        .uri("/api/calling/callback")
        .header("content-type", "application/json")
        .body(Body::from("{\"value\": [ "))
        .unwrap();
    let response = server.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.recognizer.open_count(), 0);
}

#[tokio::test]
async fn test_audio_is_fed_to_the_call() {
    let server = TestServer::new();
    let app = server.app();
    server.state.controller.on_notification(&serde_json::from_value(incoming("call-3")).unwrap()).await;

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/calls/call-3/audio", &json!({"chunk": "AQIDBA=="})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"outcome": "written"}));
    assert_eq!(server.wait_for_audio(4).await, vec![1, 2, 3, 4]);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/calls/call-3/audio",
            &json!({"chunk": {"type": "Buffer", "data": [5, 6]}}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"outcome": "written"}));

    let response = app
        .oneshot(json_request("POST", "/api/calls/call-3/audio", &json!({"chunk": 42})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"outcome": "dropped"}));
}

#[tokio::test]
async fn test_audio_for_unknown_call_is_not_found() {
    let server = TestServer::new();

    let response = server
        .app()
        .oneshot(json_request("POST", "/api/calls/ghost/audio", &json!({"chunk": "AQI="})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_delete_ends_call() {
    let server = TestServer::new();
    let app = server.app();
    server.state.controller.on_notification(&serde_json::from_value(incoming("call-4")).unwrap()).await;

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/api/calls/call-4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.state.controller.call_state("call-4"), Some(CallState::Closed));
    assert_eq!(server.recognizer.stop_count(), 1);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/calls/call-4/audio", &json!({"chunk": "AQI="})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"outcome": "inactive"}));

    let response = app.oneshot(empty_request("DELETE", "/api/calls/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_synthesize_returns_audio() {
    let server = TestServer::new();

    let response = server
        .app()
        .oneshot(json_request(
            "POST",
            "/api/speech/synthesize",
            &json!({"text": "Hello there", "voiceName": "en-GB-RyanNeural"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(body_bytes(response).await, b"reply-audio".to_vec());

    let ssml = server.synthesizer.last_ssml().unwrap();
    assert!(ssml.contains("en-GB-RyanNeural"));
    assert!(ssml.contains("Hello there"));
}

#[tokio::test]
async fn test_synthesize_rejects_empty_text() {
    let server = TestServer::new();

    let response = server
        .app()
        .oneshot(json_request("POST", "/api/speech/synthesize", &json!({"text": ""})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.synthesizer.created(), 0);
}

#[tokio::test]
async fn test_synthesis_failure_is_bad_gateway() {
    let server = TestServer::with_synthesizer(ScriptedSynthesizer::canceling("voice not found"));

    let response = server
        .app()
        .oneshot(json_request("POST", "/api/speech/synthesize", &json!({"text": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("voice not found"));
}
