use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use crate::{
    auth::{Claims, JwtKeys},
    db_core::prelude::*,
    error::{AppError, AppResult},
    model::{
        email_summary::{NewEmailSummary, SavedSummary, SummaryStore},
        user::{NewUser, UserStore},
    },
    prompt::{GenerateError, TextGenerator},
    server_config::{AuthMode, ServerConfig},
    ServerState,
};

pub const TEST_JWT_SECRET: &[u8] = b"unclutter-test-secret";

/// Replays a fixed reply (or error) and records every prompt it was given
pub struct ScriptedGenerator {
    reply: Result<String, GenerateError>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: None,
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn failing(error: GenerateError) -> Self {
        Self {
            reply: Err(error),
            delay: None,
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<Vec<user::Model>>,
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<user::Model>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<user::Model>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert(&self, new_user: NewUser) -> AppResult<user::Model> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == new_user.email) {
            return Err(AppError::Conflict("User already exists".to_string()));
        }
        let model = user::Model {
            id: Uuid::new_v4(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            created_at: Utc::now().fixed_offset(),
        };
        users.push(model.clone());
        Ok(model)
    }
}

#[derive(Default)]
pub struct InMemorySummaryStore {
    rows: Mutex<Vec<email_summary::Model>>,
}

impl InMemorySummaryStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn insert(&self, summary: NewEmailSummary) -> AppResult<()> {
        let model = email_summary::Model {
            id: Uuid::new_v4(),
            user_id: summary.user_id,
            message_id: summary.message_id,
            sender_email: summary.sender_email,
            sender_name: summary.sender_name,
            subject: summary.subject,
            received_at: summary.received_at.fixed_offset(),
            category: summary.analysis.category.to_string(),
            priority_score: summary.analysis.priority_score as i32,
            ai_summary: summary.analysis.summary,
            key_points: serde_json::json!(summary.analysis.key_points),
            action_items: serde_json::json!(summary.analysis.action_items),
            is_fallback: summary.source.is_fallback(),
        };
        self.rows.lock().unwrap().push(model);
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<SavedSummary>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(SavedSummary::from)
            .collect())
    }
}

pub struct FailingSummaryStore;

#[async_trait]
impl SummaryStore for FailingSummaryStore {
    async fn insert(&self, _summary: NewEmailSummary) -> AppResult<()> {
        Err(anyhow!("database is down").into())
    }

    async fn list_by_user(&self, _user_id: Uuid, _limit: u64) -> AppResult<Vec<SavedSummary>> {
        Err(anyhow!("database is down").into())
    }
}

pub fn test_jwt_keys() -> JwtKeys {
    JwtKeys::new(TEST_JWT_SECRET, 3600)
}

pub fn test_config(mode: AuthMode) -> ServerConfig {
    let mut config = ServerConfig::default();
    // `oneshot` requests carry no peer address for the IP limiter
    config.rate_limit.enabled = false;
    config.auth.mode = mode;
    config
}

pub fn get_test_user_claims(email: &str) -> Claims {
    let now = Utc::now().timestamp() as usize;
    Claims {
        sub: Uuid::new_v4(),
        email: email.to_string(),
        iss: "inbox-unclutter".to_string(),
        iat: now,
        exp: now + (5 * 60),
    }
}

pub struct TestStateBuilder {
    config: ServerConfig,
    generator: Arc<dyn TextGenerator>,
    users: Option<Arc<dyn UserStore>>,
    summaries: Option<Arc<dyn SummaryStore>>,
}

impl TestStateBuilder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            config: test_config(AuthMode::Optional),
            generator,
            users: None,
            summaries: None,
        }
    }

    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.config.auth.mode = mode;
        self
    }

    pub fn users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn summaries(mut self, summaries: Arc<dyn SummaryStore>) -> Self {
        self.summaries = Some(summaries);
        self
    }

    pub fn build(self) -> ServerState {
        ServerState {
            config: Arc::new(self.config),
            generator: self.generator,
            jwt_keys: test_jwt_keys(),
            users: self.users,
            summaries: self.summaries,
        }
    }
}
