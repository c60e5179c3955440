use std::time::Duration;

use async_trait::async_trait;
use derive_more::derive::Display;

/// Why a model invocation produced no usable text. Every variant is handled
/// the same way by callers: the request degrades to its fallback.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum GenerateError {
    #[display("model API key is not configured")]
    MissingCredentials,
    #[display("request to model failed: {_0}")]
    Transport(String),
    #[display("model quota exceeded: {_0}")]
    QuotaExceeded(String),
    #[display("model returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[display("response blocked by safety filters ({_0})")]
    Blocked(String),
    #[display("model returned an empty response")]
    EmptyResponse,
    #[display("could not read model response: {_0}")]
    InvalidResponse(String),
    #[display("model did not answer within {_0:?}")]
    Timeout(Duration),
}

impl std::error::Error for GenerateError {}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// A single attempt, no retries
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

pub async fn generate_with_timeout(
    generator: &dyn TextGenerator,
    prompt: &str,
    timeout: Duration,
) -> Result<String, GenerateError> {
    tokio::time::timeout(timeout, generator.generate(prompt))
        .await
        .unwrap_or_else(|_| Err(GenerateError::Timeout(timeout)))
}

const CONNECTION_CHECK_PROMPT: &str = "Say \"OK\" if you can read this.";

pub async fn check_connection(generator: &dyn TextGenerator, timeout: Duration) -> bool {
    match generate_with_timeout(generator, CONNECTION_CHECK_PROMPT, timeout).await {
        Ok(text) => {
            tracing::info!("Model connection successful: {}", text.trim());
            true
        }
        Err(e) => {
            tracing::error!("Model connection failed: {}", e);
            false
        }
    }
}
