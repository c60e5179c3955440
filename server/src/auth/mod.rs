pub mod caller;
pub mod jwt;

pub use caller::Caller;
pub use jwt::{Claims, JwtKeys};
