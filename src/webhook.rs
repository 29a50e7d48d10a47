use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    replies,
    resolver::Resolution,
    types::{AppState, InboundMessage, ReplyEnvelope, ReplyStatus, UserUpdate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Replied,
    MissingUser,
    Malformed,
}

#[derive(Debug, Clone)]
pub struct HandleOutcome {
    pub envelope: ReplyEnvelope,
    pub disposition: Disposition,
}

/// Turns one raw webhook body into a reply. Never fails: bad input and
/// internal faults become apology or identification replies.
pub async fn handle(state: &Arc<AppState>, body: &[u8]) -> HandleOutcome {
    let request_id = Uuid::new_v4().to_string();

    let inbound = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|payload| InboundMessage::from_value(&payload));
    let Some(inbound) = inbound else {
        warn!(request_id, body_len = body.len(), "webhook body is not a JSON object");
        return HandleOutcome {
            envelope: ReplyEnvelope::new(replies::APOLOGY, ReplyStatus::Error, None),
            disposition: Disposition::Malformed,
        };
    };

    let Some(user_id) = inbound.user_id else {
        warn!(request_id, message = %inbound.message, "webhook payload without user id");
        return HandleOutcome {
            envelope: ReplyEnvelope::new(replies::MISSING_USER, ReplyStatus::Error, None),
            disposition: Disposition::MissingUser,
        };
    };

    info!(request_id, user_id, message = %inbound.message, "webhook payload received");

    let resolved = AssertUnwindSafe(state.resolver.reply(&user_id, &inbound.message))
        .catch_unwind()
        .await;
    let resolution = match resolved {
        Ok(resolution) => resolution,
        Err(panic) => {
            error!(
                request_id,
                user_id,
                panic = %panic_message(panic.as_ref()),
                "reply resolution panicked"
            );
            return HandleOutcome {
                envelope: ReplyEnvelope::new(replies::APOLOGY, ReplyStatus::Error, Some(user_id)),
                disposition: Disposition::Replied,
            };
        }
    };

    info!(
        request_id,
        user_id,
        mode = resolution.mode.map(|m| m.as_str()).unwrap_or("none"),
        source = resolution.source.as_str(),
        reply_len = resolution.text.len(),
        "webhook reply sent"
    );

    let text = resolution.text.clone();
    let st = state.clone();
    let uid = user_id.clone();
    tokio::spawn(async move {
        record_activity(&st, &uid, &request_id, &resolution).await;
    });

    HandleOutcome {
        envelope: ReplyEnvelope::new(text, ReplyStatus::Success, Some(user_id)),
        disposition: Disposition::Replied,
    }
}

/// Profile bootstrap, usage analytics and exam date capture. Failures are
/// logged and dropped.
async fn record_activity(state: &AppState, user_id: &str, request_id: &str, resolution: &Resolution) {
    let profiles = state.profiles.as_ref();
    if !profiles.user_exists(user_id).await {
        match profiles.create_user(user_id).await {
            Ok(_) => info!(user_id, "new user profile created"),
            Err(err) => warn!(user_id, error = %err, "failed to create user profile"),
        }
    }

    let details = json!({
        "requestId": request_id,
        "mode": resolution.mode.map(|m| m.as_str()),
        "intent": resolution.intent.map(|i| i.to_string()),
        "source": resolution.source.as_str(),
    });
    if let Err(err) = profiles.record_event(user_id, "feature_usage", details).await {
        warn!(user_id, error = %err, "failed to record feature usage");
    }

    if let Some(exam_date) = resolution.exam_date {
        let update = UserUpdate {
            test_date: Some(exam_date),
            ..UserUpdate::default()
        };
        match profiles.update_user(user_id, &update).await {
            Ok(_) => info!(user_id, exam_date = %exam_date, "exam date stored"),
            Err(err) => warn!(user_id, error = %err, "failed to store exam date"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Transport route: always 200 with the reply under the configured field.
pub async fn transport_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome = handle(&state, &body).await;
    let mut reply = Map::new();
    reply.insert(
        state.config.reply_field.clone(),
        Value::String(outcome.envelope.message),
    );
    (StatusCode::OK, Json(Value::Object(reply))).into_response()
}

/// Generic route: full envelope, 400 when the payload cannot be handled.
pub async fn generic_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome = handle(&state, &body).await;
    let status = match outcome.disposition {
        Disposition::Replied => StatusCode::OK,
        Disposition::MissingUser | Disposition::Malformed => StatusCode::BAD_REQUEST,
    };
    (status, Json(outcome.envelope)).into_response()
}

pub async fn webhook_usage() -> impl IntoResponse {
    info!("webhook usage hint requested");
    Json(json!({
        "message": "Webhook endpoint is working",
        "note": "This is a GET request for testing. Real webhooks should use POST.",
        "testPost": {
            "method": "POST",
            "url": "/webhook/manychat",
            "headers": { "Content-Type": "application/json" },
            "body": { "userId": "test123", "message": "hi" }
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn webhook_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "service": "webhook",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "features": ["examPrep", "homework", "practice"],
        "aiConfigured": state.resolver.ai_configured(),
        "environment": state.config.environment,
    }))
}
