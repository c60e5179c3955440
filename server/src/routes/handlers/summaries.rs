use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;

use crate::{
    auth::Claims,
    error::{AppError, AppJsonResult},
    model::email_summary::{SavedSummary, SummaryStore},
};

use super::common::require_store;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SummariesQuery {
    pub limit: Option<u64>,
}

impl SummariesQuery {
    fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

pub async fn handler_list_summaries(
    claims: Claims,
    State(summaries): State<Option<Arc<dyn SummaryStore>>>,
    WithRejection(Query(query), _): WithRejection<Query<SummariesQuery>, AppError>,
) -> AppJsonResult<Vec<SavedSummary>> {
    let summaries = require_store(summaries)?;
    let saved = summaries.list_by_user(claims.sub, query.limit()).await?;
    Ok(Json(saved))
}
