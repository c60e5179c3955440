use derive_more::derive::Display;
use lib_utils::text::char_len;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{EnumString, VariantNames};

pub const MAX_SUBJECT_CHARS: usize = 200;
pub const MAX_BODY_CHARS: usize = 10_000;
pub const UNKNOWN_SENDER: &str = "Unknown";
pub const UNKNOWN_SENDER_EMAIL: &str = "unknown@example.com";

pub const FALLBACK_CATEGORY: Category = Category::Other;
pub const FALLBACK_PRIORITY_SCORE: u8 = 50;
pub const FALLBACK_KEY_POINTS: [&str; 2] = [
    "Email analysis unavailable due to API error",
    "Please check logs for details",
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Category {
    Promotion,
    Receipt,
    Update,
    Meeting,
    Social,
    Personal,
    Important,
    Other,
}

/// The canonical analysis result. Every constructor path yields a value with a
/// score in [0, 100] and a non-empty summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAnalysis {
    pub category: Category,
    pub priority_score: u8,
    pub summary: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

impl EmailAnalysis {
    pub fn fallback(sender: &str, subject: &str) -> Self {
        Self {
            category: FALLBACK_CATEGORY,
            priority_score: FALLBACK_PRIORITY_SCORE,
            summary: format!("Email from {sender}: {subject}"),
            key_points: FALLBACK_KEY_POINTS.iter().map(|s| s.to_string()).collect(),
            action_items: vec![],
        }
    }
}

/// Whether an analysis came from the model or from the fallback policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    #[display("model")]
    Model,
    #[display("fallback")]
    Fallback,
}

impl AnalysisSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, AnalysisSource::Fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub analysis: EmailAnalysis,
    pub source: AnalysisSource,
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum ValidationError {
    #[display("Request body is required")]
    EmptyBody,
    #[display("Request body must be valid JSON")]
    InvalidJson,
    #[display("Request body must be a JSON object")]
    NotAnObject,
    #[display("{_0} is required")]
    Missing(&'static str),
    #[display("{_0} must be a string")]
    WrongType(&'static str),
    #[display("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
}

impl std::error::Error for ValidationError {}

/// A validated, trimmed analysis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub sender: Option<String>,
    pub subject: String,
    pub body: String,
}

impl AnalysisRequest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ValidationError::EmptyBody);
        }
        let value: Value = serde_json::from_slice(bytes).map_err(|_| ValidationError::InvalidJson)?;
        Self::from_json(&value)
    }

    /// Presence is checked before type, and type before length. Lengths are
    /// measured on the raw value, before trimming.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let subject = required_string(obj.get("subject"), "subject")?;
        let body = required_string(obj.get("body"), "body")?;
        let sender = optional_string(obj.get("sender"), "sender")?;

        if char_len(subject) > MAX_SUBJECT_CHARS {
            return Err(ValidationError::TooLong {
                field: "subject",
                max: MAX_SUBJECT_CHARS,
            });
        }
        if char_len(body) > MAX_BODY_CHARS {
            return Err(ValidationError::TooLong {
                field: "body",
                max: MAX_BODY_CHARS,
            });
        }

        Ok(Self {
            sender: sender
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            subject: subject.trim().to_string(),
            body: body.trim().to_string(),
        })
    }

    pub fn sender_name(&self) -> &str {
        self.sender.as_deref().unwrap_or(UNKNOWN_SENDER)
    }

    pub fn sender_email(&self) -> &str {
        self.sender.as_deref().unwrap_or(UNKNOWN_SENDER_EMAIL)
    }
}

fn required_string<'a>(
    value: Option<&'a Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::WrongType(field)),
    }
}

fn optional_string<'a>(
    value: Option<&'a Value>,
    field: &'static str,
) -> Result<Option<&'a str>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ValidationError::WrongType(field)),
    }
}

pub fn category_list() -> String {
    Category::VARIANTS.join(", ")
}
