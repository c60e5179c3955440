use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    prompt::{check_connection, TextGenerator},
    server_config::ServerConfig,
};

pub async fn handler_service_info(State(config): State<Arc<ServerConfig>>) -> Json<Value> {
    Json(json!({
        "name": "Inbox Unclutter API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "auth": config.auth.mode.to_string(),
        "endpoints": {
            "health": "GET /api/health",
            "modelHealth": "GET /api/health/model",
            "analyzeEmail": "POST /api/emails/analyze",
            "digest": "POST /api/emails/digest",
            "summaries": "GET /api/emails/summaries",
            "signup": "POST /api/auth/signup",
            "signin": "POST /api/auth/signin",
            "me": "GET /api/auth/me",
        }
    }))
}

pub async fn handler_health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Inbox Unclutter API is running" }))
}

pub async fn handler_model_health(
    State(config): State<Arc<ServerConfig>>,
    State(generator): State<Arc<dyn TextGenerator>>,
) -> Json<Value> {
    let connected = check_connection(generator.as_ref(), config.model.timeout()).await;
    Json(json!({ "connected": connected }))
}
