pub mod analysis;
pub mod digest;
pub mod gemini;
pub mod generator;

pub use analysis::analyze_email;
pub use digest::generate_digest;
pub use gemini::GeminiClient;
pub use generator::{check_connection, GenerateError, TextGenerator};
