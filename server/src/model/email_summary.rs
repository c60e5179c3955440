use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{db_core::prelude::*, error::AppResult};

use super::analysis::{AnalysisSource, EmailAnalysis};

/// A finished analysis, ready to be written to storage
#[derive(Debug, Clone)]
pub struct NewEmailSummary {
    pub user_id: Option<Uuid>,
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub analysis: EmailAnalysis,
    pub source: AnalysisSource,
}

impl NewEmailSummary {
    /// Pasted emails have no provider message id, one is derived from the time received
    pub fn manual_message_id(received_at: DateTime<Utc>) -> String {
        format!("manual-{}", received_at.timestamp_millis())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedSummary {
    pub id: Uuid,
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub received_at: DateTimeWithTimeZone,
    pub category: String,
    pub priority_score: i32,
    pub ai_summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub is_fallback: bool,
}

impl From<email_summary::Model> for SavedSummary {
    fn from(model: email_summary::Model) -> Self {
        Self {
            id: model.id,
            message_id: model.message_id,
            sender_email: model.sender_email,
            sender_name: model.sender_name,
            subject: model.subject,
            received_at: model.received_at,
            category: model.category,
            priority_score: model.priority_score,
            ai_summary: model.ai_summary,
            key_points: serde_json::from_value(model.key_points).unwrap_or_default(),
            action_items: serde_json::from_value(model.action_items).unwrap_or_default(),
            is_fallback: model.is_fallback,
        }
    }
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn insert(&self, summary: NewEmailSummary) -> AppResult<()>;

    /// Most recent first
    async fn list_by_user(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<SavedSummary>>;
}

pub struct DbSummaryStore {
    conn: DatabaseConnection,
}

impl DbSummaryStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SummaryStore for DbSummaryStore {
    async fn insert(&self, summary: NewEmailSummary) -> AppResult<()> {
        let NewEmailSummary {
            user_id,
            message_id,
            sender_email,
            sender_name,
            subject,
            received_at,
            analysis,
            source,
        } = summary;

        let key_points =
            serde_json::to_value(analysis.key_points).context("Could not serialize key points")?;
        let action_items = serde_json::to_value(analysis.action_items)
            .context("Could not serialize action items")?;

        let active_model = email_summary::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            user_id: ActiveValue::Set(user_id),
            message_id: ActiveValue::Set(message_id),
            sender_email: ActiveValue::Set(sender_email),
            sender_name: ActiveValue::Set(sender_name),
            subject: ActiveValue::Set(subject),
            received_at: ActiveValue::Set(received_at.fixed_offset()),
            category: ActiveValue::Set(analysis.category.to_string()),
            priority_score: ActiveValue::Set(analysis.priority_score as i32),
            ai_summary: ActiveValue::Set(analysis.summary),
            key_points: ActiveValue::Set(key_points),
            action_items: ActiveValue::Set(action_items),
            is_fallback: ActiveValue::Set(source.is_fallback()),
        };

        EmailSummary::insert(active_model)
            .exec_without_returning(&self.conn)
            .await?;

        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<SavedSummary>> {
        let summaries = EmailSummary::find()
            .filter(email_summary::Column::UserId.eq(user_id))
            .order_by_desc(email_summary::Column::ReceivedAt)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Error fetching email summaries")?;

        Ok(summaries.into_iter().map(SavedSummary::from).collect())
    }
}

/// Writes the summary on a detached task. The caller never waits on it and a
/// failed write is only logged.
pub fn persist_in_background(
    store: Option<Arc<dyn SummaryStore>>,
    summary: NewEmailSummary,
) -> Option<JoinHandle<()>> {
    let Some(store) = store else {
        tracing::debug!("No summary store configured, skipping save");
        return None;
    };

    Some(tokio::spawn(async move {
        let message_id = summary.message_id.clone();
        match store.insert(summary).await {
            Ok(_) => tracing::info!("Saved email summary {}", message_id),
            Err(e) => tracing::warn!("Could not save email summary {}: {:?}", message_id, e),
        }
    }))
}
