use std::sync::Arc;

use crate::error::{AppError, AppResult};

const NO_DATABASE: &str = "Database is not configured";

/// Account and history routes need a store; without `DATABASE_URL` they answer 503
pub(super) fn require_store<T: ?Sized>(store: Option<Arc<T>>) -> AppResult<Arc<T>> {
    store.ok_or_else(|| AppError::ServiceUnavailable(NO_DATABASE.to_string()))
}
