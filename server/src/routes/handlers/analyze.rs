use std::sync::Arc;

use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::Serialize;

use crate::{
    auth::Caller,
    error::{AppError, AppResult},
    model::{
        analysis::{AnalysisOutcome, AnalysisRequest, EmailAnalysis},
        email_summary::{persist_in_background, NewEmailSummary, SummaryStore},
    },
    prompt::{analyze_email, TextGenerator},
    server_config::ServerConfig,
};

pub const ANALYSIS_SOURCE_HEADER: &str = "x-analysis-source";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub subject: String,
    pub sender_email: String,
    pub sender_name: String,
    #[serde(flatten)]
    pub analysis: EmailAnalysis,
}

pub async fn handler_analyze(
    caller: Caller,
    State(config): State<Arc<ServerConfig>>,
    State(generator): State<Arc<dyn TextGenerator>>,
    State(summaries): State<Option<Arc<dyn SummaryStore>>>,
    WithRejection(body, _): WithRejection<Bytes, AppError>,
) -> AppResult<impl IntoResponse> {
    // Rejected requests never reach the model
    let request =
        AnalysisRequest::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let AnalysisOutcome { analysis, source } = analyze_email(
        generator.as_ref(),
        &request,
        config.prompt.max_body_chars,
        config.model.timeout(),
    )
    .await;

    tracing::info!(
        category = %analysis.category,
        priority_score = analysis.priority_score,
        source = %source,
        "Email analyzed"
    );

    let received_at = Utc::now();
    persist_in_background(
        summaries,
        NewEmailSummary {
            user_id: caller.user_id(),
            message_id: NewEmailSummary::manual_message_id(received_at),
            sender_email: request.sender_email().to_string(),
            sender_name: request.sender_name().to_string(),
            subject: request.subject.clone(),
            received_at,
            analysis: analysis.clone(),
            source,
        },
    );

    let response = AnalyzeResponse {
        sender_email: request.sender_email().to_string(),
        sender_name: request.sender_name().to_string(),
        subject: request.subject,
        analysis,
    };

    Ok(([(ANALYSIS_SOURCE_HEADER, source.to_string())], Json(response)))
}
