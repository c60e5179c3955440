pub mod prelude;

pub mod email_summary;
pub mod user;
