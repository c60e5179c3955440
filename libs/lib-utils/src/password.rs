use derive_more::derive::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    #[display("Failed to hash password: {_0}")]
    HashFailed(String),
    #[display("Failed to verify password: {_0}")]
    VerifyFailed(String),
}

impl std::error::Error for Error {}

pub const COST: u32 = 10;

/// Hashes a password with bcrypt. This is CPU heavy, async callers should run
/// it on a blocking thread.
pub fn hash(password: &str) -> Result<String> {
    bcrypt::hash(password, COST).map_err(|e| Error::HashFailed(e.to_string()))
}

pub fn verify(password: &str, hashed: &str) -> Result<bool> {
    bcrypt::verify(password, hashed).map_err(|e| Error::VerifyFailed(e.to_string()))
}
