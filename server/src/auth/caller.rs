use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
};
use http::request::Parts;
use uuid::Uuid;

use crate::{
    error::AppError,
    server_config::{AuthMode, ServerConfig},
};

use super::jwt::{Claims, JwtKeys};

/// Who is calling an analysis route, resolved according to `auth.mode`.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    User(Claims),
}

impl Caller {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Caller::Anonymous => None,
            Caller::User(claims) => Some(claims.sub),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
    Arc<ServerConfig>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mode = Arc::<ServerConfig>::from_ref(state).auth.mode;
        match mode {
            AuthMode::Disabled => Ok(Caller::Anonymous),
            AuthMode::Required => Claims::from_request_parts(parts, state)
                .await
                .map(Caller::User),
            AuthMode::Optional => match Claims::from_request_parts(parts, state).await {
                Ok(claims) => Ok(Caller::User(claims)),
                Err(e) => {
                    tracing::debug!("No usable token ({}), continuing as anonymous", e);
                    Ok(Caller::Anonymous)
                }
            },
        }
    }
}
