use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::{
    db_core::prelude::*,
    error::{is_unique_violation, AppError, AppResult},
};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
}

/// Public view of an account, never includes the password hash
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTimeWithTimeZone,
}

impl From<user::Model> for UserView {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<user::Model>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<user::Model>>;

    /// Fails with `AppError::Conflict` when the email is taken
    async fn insert(&self, new_user: NewUser) -> AppResult<user::Model>;
}

pub struct DbUserStore {
    conn: DatabaseConnection,
}

impl DbUserStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserStore for DbUserStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<user::Model>> {
        let user = User::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Error fetching user by email")?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<user::Model>> {
        let user = User::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Error fetching user by id")?;

        Ok(user)
    }

    async fn insert(&self, new_user: NewUser) -> AppResult<user::Model> {
        let active_model = user::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            email: ActiveValue::Set(new_user.email),
            password_hash: ActiveValue::Set(new_user.password_hash),
            created_at: ActiveValue::Set(Utc::now().fixed_offset()),
        };

        match active_model.insert(&self.conn).await {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                Err(AppError::Conflict("User already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
