use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "linkml-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reports which capabilities can serve requests right now.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ready",
        "backend": state.config.backend.as_str(),
        "capabilities": {
            "generate": true,
            "validate": true,
            "assistant": state.dispatcher.assistant_configured()
        }
    }))
}
