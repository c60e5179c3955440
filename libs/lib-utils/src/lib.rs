pub mod password;
pub mod text;
