pub mod analysis;
pub mod email_summary;
pub mod user;
