use std::sync::Arc;

use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

const ISSUER: &str = "inbox-unclutter";
const LEEWAY_SECS: u64 = 60;

#[derive(Clone)]
pub struct JwtKeys {
    inner: Arc<Keys>,
    ttl_secs: usize,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &[u8], ttl_secs: usize) -> Self {
        Self {
            inner: Arc::new(Keys {
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
            }),
            ttl_secs,
        }
    }

    /// `JWT_SECRET` is expected to be hex encoded
    pub fn from_hex_secret(secret: &str, ttl_secs: usize) -> anyhow::Result<Self> {
        let decoded_secret = hex::decode(secret.trim()).context("JWT_SECRET was not valid hex")?;
        anyhow::ensure!(!decoded_secret.is_empty(), "JWT_SECRET is empty");
        Ok(Self::new(&decoded_secret, ttl_secs))
    }

    pub fn issue(&self, user_id: Uuid, email: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.inner.encoding)
            .map_err(|_| AuthError::TokenCreation)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[ISSUER]);

        let token_data = jsonwebtoken::decode::<Claims>(token, &self.inner.decoding, &validation)
            .map_err(|e| {
                tracing::debug!("Error decoding token: {:?}", e);
                AuthError::InvalidToken
            })?;

        Ok(token_data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug)]
pub enum AuthError {
    WrongCredentials,
    MissingCredentials,
    TokenCreation,
    InvalidToken,
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingCredentials)?;

        let keys = JwtKeys::from_ref(state);
        Ok(keys.decode(bearer.token())?)
    }
}
