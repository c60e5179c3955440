use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{rate_limiters::RateLimiters, server_config::ModelConfig, HttpClient};

use super::generator::{GenerateError, TextGenerator};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `generateContent` client with fixed generation parameters
#[derive(Clone)]
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: Option<String>,
    model: ModelConfig,
    rate_limiters: RateLimiters,
}

impl GeminiClient {
    pub fn new(
        http_client: HttpClient,
        api_key: Option<String>,
        model: ModelConfig,
        rate_limiters: RateLimiters,
    ) -> Self {
        let api_key = api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        Self {
            http_client,
            api_key,
            model,
            rate_limiters,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.model.base_url.trim_end_matches('/'),
            self.model.id
        )
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": prompt }]
                }
            ],
            "generationConfig": {
                "temperature": self.model.temperature,
                "topP": self.model.top_p,
                "topK": self.model.top_k,
                "maxOutputTokens": self.model.max_output_tokens,
            }
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerateError::MissingCredentials)?;

        self.rate_limiters.acquire_one().await;

        let resp = self
            .http_client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .timeout(self.model.timeout())
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout(self.model.timeout())
                } else {
                    GenerateError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| GenerateError::InvalidResponse(format!("{} ({})", e, status)))?;

        let parsed = serde_json::from_value::<GenerateContentResponseOrError>(body.clone())
            .map_err(|e| {
                GenerateError::InvalidResponse(format!("{}: {}", e, body))
            })?;

        match parsed {
            GenerateContentResponseOrError::Error(ApiErrorBody { error }) => {
                let quota = status == StatusCode::TOO_MANY_REQUESTS
                    || error.status == "RESOURCE_EXHAUSTED";
                if quota {
                    self.rate_limiters.trigger_backoff();
                    tracing::warn!("Model quota hit, {}", self.rate_limiters.get_status());
                    return Err(GenerateError::QuotaExceeded(error.message));
                }
                Err(GenerateError::Upstream {
                    status: error.code,
                    message: error.message,
                })
            }
            GenerateContentResponseOrError::Response(_) if !status.is_success() => {
                Err(GenerateError::Upstream {
                    status: status.as_u16(),
                    message: body.to_string(),
                })
            }
            GenerateContentResponseOrError::Response(parsed) => {
                if let Some(usage) = &parsed.usage_metadata {
                    tracing::debug!(
                        "Model usage: prompt={:?} candidates={:?} total={:?}",
                        usage.prompt_token_count,
                        usage.candidates_token_count,
                        usage.total_token_count
                    );
                }
                response_text(parsed)
            }
        }
    }
}

/// Pulls the reply text out of a successful response. A blocked prompt or a
/// candidate stopped by a safety filter counts as failure, even if some text came back.
pub fn response_text(resp: GenerateContentResponse) -> Result<String, GenerateError> {
    if let Some(reason) = resp
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_ref())
    {
        return Err(GenerateError::Blocked(reason.clone()));
    }

    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or(GenerateError::EmptyResponse)?;

    if let Some(reason) = &candidate.finish_reason {
        if reason.is_blocked() {
            return Err(GenerateError::Blocked(format!("{:?}", reason)));
        }
    }

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerateError::EmptyResponse);
    }

    Ok(text)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Blocklist,
    ProhibitedContent,
    Spii,
    #[serde(other)]
    Other,
}

impl FinishReason {
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            FinishReason::Safety
                | FinishReason::Blocklist
                | FinishReason::ProhibitedContent
                | FinishReason::Spii
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: Option<i64>,
    pub candidates_token_count: Option<i64>,
    pub total_token_count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateContentResponseOrError {
    Error(ApiErrorBody),
    Response(GenerateContentResponse),
}
