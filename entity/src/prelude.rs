pub use super::email_summary::Entity as EmailSummary;
pub use super::user::Entity as User;
