use anyhow::anyhow;
use axum::{
    extract::rejection::{BytesRejection, JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use lib_utils::password;
use serde_json::json;

use crate::{auth::jwt::AuthError, db_core::prelude::*};

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    MethodNotAllowed,
    TooManyRequests,
    ServiceUnavailable(String),
    DbError(DbErr),
    Conflict(String),
    Unauthorized(String),
    PayloadTooLarge,
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<DbErr> for AppError {
    fn from(error: DbErr) -> Self {
        AppError::DbError(error)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl From<password::Error> for AppError {
    fn from(error: password::Error) -> Self {
        tracing::error!("Password error: {:?}", error);
        AppError::Internal(anyhow!(error.to_string()))
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::TokenCreation => AppError::Internal(anyhow!("Error creating token")),
            AuthError::InvalidToken => AppError::Unauthorized("Invalid token".to_string()),
            AuthError::MissingCredentials => {
                AppError::Unauthorized("No token provided".to_string())
            }
            AuthError::WrongCredentials => {
                AppError::Unauthorized("Invalid email or password".to_string())
            }
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

// Every error leaves the server as `{"error": "<message>"}`
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Unauthorized(msg)
            | AppError::ServiceUnavailable(msg) => msg,
            AppError::MethodNotAllowed => "Method not allowed".to_string(),
            AppError::PayloadTooLarge => "Request body is too large".to_string(),
            AppError::TooManyRequests => {
                "Too many requests from this IP, please try again later.".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "Internal server error".to_string()
            }
            AppError::DbError(err) => {
                tracing::error!("Database error: {:?}", err);
                "Database error".to_string()
            }
        };

        if status.is_server_error() {
            tracing::error!("Error response {}: {}", status, message);
        } else {
            tracing::debug!("Error response {}: {}", status, message);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
