use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use lib_utils::{password, text::char_len};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    auth::{jwt::AuthError, Claims, JwtKeys},
    error::{AppError, AppJsonResult, AppResult},
    model::user::{NewUser, UserStore, UserView},
    server_config::ServerConfig,
};

use super::common::require_store;

#[derive(Debug, Deserialize)]
pub struct CredentialsPayload {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl CredentialsPayload {
    /// Emails are compared case-insensitively, so they are stored lowercased
    fn into_parts(self) -> AppResult<(String, String)> {
        let email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        let password = self.password.filter(|p| !p.is_empty());

        match (email, password) {
            (Some(email), Some(password)) => Ok((email, password)),
            _ => Err(AppError::BadRequest(
                "Email and password are required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    pub token: String,
}

pub async fn handler_signup(
    State(config): State<Arc<ServerConfig>>,
    State(keys): State<JwtKeys>,
    State(users): State<Option<Arc<dyn UserStore>>>,
    WithRejection(Json(payload), _): WithRejection<Json<CredentialsPayload>, AppError>,
) -> AppJsonResult<AuthResponse> {
    let users = require_store(users)?;
    let (email, password) = payload.into_parts()?;

    let min_len = config.auth.min_password_len;
    if char_len(&password) < min_len {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            min_len
        )));
    }

    if users.find_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest("User already exists".to_string()));
    }

    let password_hash = tokio::task::spawn_blocking(move || password::hash(&password))
        .await
        .context("Password hashing task failed")??;

    let user = users
        .insert(NewUser {
            email,
            password_hash,
        })
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent signup for the same email
            AppError::Conflict(msg) => AppError::BadRequest(msg),
            other => other,
        })?;

    let token = keys.issue(user.id, &user.email)?;
    tracing::info!("User created: {}", user.email);

    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

pub async fn handler_signin(
    State(keys): State<JwtKeys>,
    State(users): State<Option<Arc<dyn UserStore>>>,
    WithRejection(Json(payload), _): WithRejection<Json<CredentialsPayload>, AppError>,
) -> AppJsonResult<AuthResponse> {
    let users = require_store(users)?;
    let (email, password) = payload.into_parts()?;

    let user = users
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::WrongCredentials)?;

    let password_hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify(&password, &password_hash))
        .await
        .context("Password verification task failed")??;

    if !valid {
        return Err(AuthError::WrongCredentials.into());
    }

    let token = keys.issue(user.id, &user.email)?;
    tracing::info!("User signed in: {}", user.email);

    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

pub async fn handler_me(
    claims: Claims,
    State(users): State<Option<Arc<dyn UserStore>>>,
) -> AppJsonResult<Value> {
    let users = require_store(users)?;
    let user = users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(json!({ "user": UserView::from(user) })))
}
