pub mod analyze;
pub mod auth;
mod common;
pub mod digest;
pub mod health;
pub mod summaries;
