use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::{error::AppResult, types::AppState};

const ENDPOINTS: &[&str] = &[
    "GET /health",
    "POST /api/webhook",
    "POST /webhook/manychat",
    "GET /webhook/manychat",
    "GET /webhook/health",
    "GET /monitoring/health",
    "GET /monitoring/database-status",
    "GET /monitoring/test",
];

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to GOAT Bot Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now_iso(),
        "endpoints": ENDPOINTS,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "message": "GOAT Bot Backend is running",
        "timestamp": now_iso(),
        "environment": state.config.environment,
    }))
}

async fn database_service(state: &AppState) -> Value {
    let backend = state.profiles.backend();
    match state.profiles.ping().await {
        Ok(()) => json!({
            "status": "connected",
            "backend": backend,
            "message": "Database connection successful",
        }),
        Err(err) => {
            warn!(backend, error = %err, "database health check failed");
            json!({
                "status": "error",
                "backend": backend,
                "error": err.to_string(),
                "message": "Database connection failed",
            })
        }
    }
}

fn ai_service(state: &AppState) -> Value {
    if state.resolver.ai_configured() {
        json!({ "status": "connected", "message": "Completion service configured" })
    } else {
        json!({
            "status": "mock_mode",
            "message": "Using template replies - add OPENAI_API_KEY to environment",
        })
    }
}

/// `DEGRADED` when any service reports `error`.
pub fn overall_status(services: &Value) -> &'static str {
    let has_errors = services
        .as_object()
        .map(|services| {
            services
                .values()
                .any(|service| service.get("status").and_then(Value::as_str) == Some("error"))
        })
        .unwrap_or(false);
    if has_errors {
        "DEGRADED"
    } else {
        "OK"
    }
}

pub async fn monitoring_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = json!({
        "app": { "status": "running" },
        "database": database_service(&state).await,
        "openai": ai_service(&state),
    });
    Json(json!({
        "status": overall_status(&services),
        "timestamp": now_iso(),
        "environment": state.config.environment,
        "services": services,
        "system": {
            "uptimeSecs": state.started_at.elapsed().as_secs(),
            "activeSessions": state.sessions.len(),
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

/// Pings the profile store; a failed ping is reported as an `AppError`.
pub async fn database_status(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    state.profiles.ping().await?;
    Ok(Json(json!({
        "timestamp": now_iso(),
        "persistent": state.profiles.backend() != "memory",
        "database": {
            "status": "connected",
            "backend": state.profiles.backend(),
            "message": "Database connection successful",
        },
    })))
}

pub async fn monitoring_test() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "message": "Monitoring endpoint is working",
        "timestamp": now_iso(),
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": "The requested endpoint does not exist",
            "availableEndpoints": ENDPOINTS,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_error_degrades_the_status() {
        let healthy = json!({
            "app": { "status": "running" },
            "database": { "status": "connected" },
            "openai": { "status": "mock_mode" },
        });
        assert_eq!(overall_status(&healthy), "OK");

        let broken = json!({
            "database": { "status": "error", "error": "refused" },
            "openai": { "status": "connected" },
        });
        assert_eq!(overall_status(&broken), "DEGRADED");
    }
}
