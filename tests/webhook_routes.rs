use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use goat_bot::{
    ai::{Completion, CompletionClient, OpenAiClient, PromptHints},
    app::{assemble_state, build_router},
    config::AppConfig,
    db::{MemoryProfileStore, ProfileStore},
    replies,
    session_store::{MemorySessionStore, SessionStore},
    types::AppState,
};

struct PanickingClient;

#[async_trait]
impl CompletionClient for PanickingClient {
    async fn complete(&self, _prompt: &str, _label: &str, _hints: &PromptHints) -> Completion {
        panic!("completion client exploded");
    }

    fn is_configured(&self) -> bool {
        true
    }
}

struct Harness {
    app: axum::Router,
    state: Arc<AppState>,
    profiles: Arc<MemoryProfileStore>,
}

fn harness_with(config: AppConfig, ai: Option<Arc<dyn CompletionClient>>) -> Harness {
    let profiles = Arc::new(MemoryProfileStore::new());
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(config.session_ttl));
    let ai = ai.unwrap_or_else(|| -> Arc<dyn CompletionClient> {
        Arc::new(OpenAiClient::from_config(&config).expect("client builds"))
    });
    let state = assemble_state(config, sessions, profiles.clone(), ai);
    Harness {
        app: build_router(state.clone()),
        state,
        profiles,
    }
}

fn harness() -> Harness {
    harness_with(AppConfig::default(), None)
}

async fn send(app: &axum::Router, method: &str, path: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("router responds");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let value = serde_json::from_slice::<Value>(&bytes).expect("json body");
    (status, value)
}

async fn post(app: &axum::Router, path: &str, payload: Value) -> (StatusCode, Value) {
    send(app, "POST", path, &payload.to_string()).await
}

/// Waits for the background activity recording of a webhook call.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn transport_route_replies_with_a_single_field() {
    let h = harness();
    let (status, body) = post(&h.app, "/api/webhook", json!({ "userId": "u1", "message": "hi" })).await;

    assert_eq!(status, StatusCode::OK);
    let object = body.as_object().expect("object body");
    assert_eq!(object.len(), 1);
    assert_eq!(body["message"], replies::MAIN_MENU);
}

#[tokio::test]
async fn transport_route_uses_the_configured_reply_field() {
    let config = AppConfig {
        reply_field: "text".to_string(),
        ..AppConfig::default()
    };
    let h = harness_with(config, None);
    let (status, body) = post(&h.app, "/api/webhook", json!({ "psid": 42, "text": "menu" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "text": replies::MAIN_MENU }));
}

#[tokio::test]
async fn transport_route_never_fails_on_bad_input() {
    let h = harness();

    let (status, body) = post(&h.app, "/api/webhook", json!({ "message": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": replies::MISSING_USER }));

    let (status, body) = send(&h.app, "POST", "/api/webhook", "{not json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": replies::APOLOGY }));
}

#[tokio::test]
async fn generic_route_rejects_unidentified_or_malformed_payloads() {
    let h = harness();

    let (status, body) = post(&h.app, "/webhook/manychat", json!({ "message": "1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], replies::MISSING_USER);

    let (status, body) = send(&h.app, "POST", "/webhook/manychat", "[1, 2, 3]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], replies::APOLOGY);
}

#[tokio::test]
async fn generic_route_returns_the_full_envelope() {
    let h = harness();
    let (status, body) =
        post(&h.app, "/webhook/manychat", json!({ "userId": "u7", "message": "math" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["userId"], "u7");
    assert_eq!(body["message"], replies::MATH_SUBJECT);
    assert_eq!(body["echo"], body["message"]);
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn menu_flow_enters_and_leaves_a_mode() {
    let h = harness();
    let user = json!({ "userId": "flow" });
    let with = |message: &str| {
        let mut payload = user.clone();
        payload["message"] = json!(message);
        payload
    };

    let (_, body) = post(&h.app, "/api/webhook", with("1")).await;
    assert_eq!(body["message"], replies::EXAM_PREP_ENTRY);
    assert!(h.state.sessions.get("flow").is_some());

    // Inside a mode "hi" is not a greeting.
    let (_, body) = post(&h.app, "/api/webhook", with("hi")).await;
    assert_eq!(body["message"], replies::EXAM_PREP_CONTINUE);

    let (_, body) = post(&h.app, "/api/webhook", with("menu")).await;
    assert_eq!(body["message"], replies::MAIN_MENU);
    assert!(h.state.sessions.get("flow").is_none());
}

#[tokio::test]
async fn homework_mode_falls_back_without_a_completion_service() {
    let h = harness();
    post(&h.app, "/api/webhook", json!({ "userId": "hw", "message": "2" })).await;
    let (status, body) = post(
        &h.app,
        "/api/webhook",
        json!({ "userId": "hw", "message": "solve 2x + 3 = 7" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], replies::HOMEWORK_CONTINUE);
}

#[tokio::test]
async fn panics_during_resolution_become_an_apology() {
    let h = harness_with(AppConfig::default(), Some(Arc::new(PanickingClient)));

    let (status, body) =
        post(&h.app, "/api/webhook", json!({ "userId": "p1", "message": "qwerty" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": replies::APOLOGY }));

    // The server keeps serving afterwards.
    let (_, body) = post(&h.app, "/api/webhook", json!({ "userId": "p1", "message": "hi" })).await;
    assert_eq!(body["message"], replies::MAIN_MENU);
}

#[tokio::test]
async fn first_contact_creates_a_profile_and_records_usage() {
    let h = harness();
    post(&h.app, "/api/webhook", json!({ "userId": "new", "message": "hello" })).await;

    let profiles = h.profiles.clone();
    assert!(eventually(|| {
        let profiles = profiles.clone();
        async move { profiles.user_exists("new").await }
    })
    .await);

    let profiles = h.profiles.clone();
    assert!(eventually(|| {
        let profiles = profiles.clone();
        async move {
            profiles
                .events()
                .await
                .iter()
                .any(|e| e.user_id == "new" && e.kind == "feature_usage")
        }
    })
    .await);
}

#[tokio::test]
async fn exam_date_is_stored_on_the_profile() {
    let h = harness();
    post(&h.app, "/api/webhook", json!({ "userId": "ex", "message": "exam" })).await;
    post(
        &h.app,
        "/api/webhook",
        json!({ "userId": "ex", "message": "my maths exam is on 2099-01-15" }),
    )
    .await;

    let expected = NaiveDate::from_ymd_opt(2099, 1, 15).expect("valid date");
    let profiles = h.profiles.clone();
    assert!(eventually(|| {
        let profiles = profiles.clone();
        async move {
            matches!(
                profiles.get_user("ex").await,
                Ok(Some(user)) if user.test_date == Some(expected)
            )
        }
    })
    .await);
}

#[tokio::test]
async fn monitoring_reports_memory_store_and_mock_ai() {
    let h = harness();
    post(&h.app, "/api/webhook", json!({ "userId": "m1", "message": "3" })).await;

    let (status, body) = send(&h.app, "GET", "/monitoring/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["services"]["database"]["status"], "connected");
    assert_eq!(body["services"]["database"]["backend"], "memory");
    assert_eq!(body["services"]["openai"]["status"], "mock_mode");
    assert_eq!(body["system"]["activeSessions"], 1);

    let (status, body) = send(&h.app, "GET", "/monitoring/database-status", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["persistent"], false);
}

#[tokio::test]
async fn service_routes_and_unknown_paths() {
    let h = harness();

    let (status, body) = send(&h.app, "GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["environment"], "development");

    let (status, body) = send(&h.app, "GET", "/webhook/manychat", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["testPost"]["method"], "POST");

    let (status, body) = send(&h.app, "GET", "/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["availableEndpoints"].as_array().is_some());
}
