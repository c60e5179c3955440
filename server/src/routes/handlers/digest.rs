use std::sync::Arc;

use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

use crate::{
    auth::Caller,
    error::{AppError, AppJsonResult},
    model::analysis::AnalysisSource,
    prompt::{digest::DigestEmail, generate_digest, TextGenerator},
    server_config::ServerConfig,
};

#[derive(Debug, Deserialize)]
pub struct DigestPayload {
    pub emails: Vec<DigestEmail>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestResponse {
    pub digest: String,
    pub email_count: usize,
    pub source: AnalysisSource,
}

pub async fn handler_digest(
    _caller: Caller,
    State(config): State<Arc<ServerConfig>>,
    State(generator): State<Arc<dyn TextGenerator>>,
    WithRejection(Json(payload), _): WithRejection<Json<DigestPayload>, AppError>,
) -> AppJsonResult<DigestResponse> {
    let outcome = generate_digest(
        generator.as_ref(),
        &payload.emails,
        config.prompt.digest_max_emails,
        config.model.timeout(),
    )
    .await;

    Ok(Json(DigestResponse {
        digest: outcome.digest,
        email_count: payload.emails.len(),
        source: outcome.source,
    }))
}
