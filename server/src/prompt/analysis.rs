use std::{str::FromStr, time::Duration};

use derive_more::derive::Display;
use indoc::formatdoc;
use lib_utils::text::truncate_chars;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::analysis::{
    category_list, AnalysisOutcome, AnalysisRequest, AnalysisSource, Category, EmailAnalysis,
};

use super::generator::{generate_with_timeout, GenerateError, TextGenerator};

const MIN_PRIORITY_SCORE: f64 = 0.0;
const MAX_PRIORITY_SCORE: f64 = 100.0;
const RESPONSE_PREVIEW_CHARS: usize = 200;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").unwrap());
static TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

pub fn build_analysis_prompt(request: &AnalysisRequest, max_body_chars: usize) -> String {
    formatdoc! {r#"
        Analyze this email and respond ONLY with a valid JSON object (no markdown, no extra text):

        From: {sender}
        Subject: {subject}
        Body: {body}

        Return a JSON object with this exact structure:
        {{
          "category": "one of: {categories}",
          "priorityScore": number between 0-100,
          "summary": "1-2 sentence summary",
          "keyPoints": ["point 1", "point 2", "point 3"],
          "actionItems": ["action 1", "action 2"] (optional, empty array if none)
        }}

        Respond with ONLY the JSON object, nothing else."#,
        sender = request.sender_name(),
        subject = request.subject,
        body = truncate_chars(&request.body, max_body_chars),
        categories = category_list(),
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum ExtractionError {
    #[display("no JSON object found in response")]
    NoJsonObject,
    #[display("response JSON did not parse: {_0}")]
    InvalidJson(String),
    #[display("response JSON is not an object")]
    NotAnObject,
    #[display("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl std::error::Error for ExtractionError {}

fn invalid(field: &'static str, reason: impl Into<String>) -> ExtractionError {
    ExtractionError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Recovers an `EmailAnalysis` from free model text. A code fence wrapping the
/// whole reply is removed, then the span from the first `{` to the last `}` is
/// parsed and validated. Backticks inside the JSON are left alone.
pub fn extract_analysis(text: &str) -> Result<EmailAnalysis, ExtractionError> {
    let cleaned = strip_code_fence(text);
    let candidate = JSON_OBJECT
        .find(cleaned)
        .ok_or(ExtractionError::NoJsonObject)?;

    let value: Value = serde_json::from_str(candidate.as_str())
        .map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    validate_analysis(&value)
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let start = LEADING_FENCE.find(text).map_or(0, |m| m.end());
    let text = &text[start..];
    let end = TRAILING_FENCE.find(text).map_or(text.len(), |m| m.start());
    text[..end].trim()
}

pub fn validate_analysis(value: &Value) -> Result<EmailAnalysis, ExtractionError> {
    let obj = value.as_object().ok_or(ExtractionError::NotAnObject)?;

    Ok(EmailAnalysis {
        category: parse_category(obj)?,
        priority_score: parse_priority_score(obj)?,
        summary: parse_summary(obj)?,
        key_points: parse_string_list(obj, "keyPoints", false)?,
        action_items: parse_string_list(obj, "actionItems", true)?,
    })
}

fn parse_category(obj: &Map<String, Value>) -> Result<Category, ExtractionError> {
    let raw = match obj.get("category") {
        Some(Value::String(s)) => s.trim(),
        Some(Value::Null) | None => return Err(invalid("category", "missing")),
        Some(other) => return Err(invalid("category", format!("not a string: {}", other))),
    };
    Category::from_str(raw).map_err(|_| invalid("category", format!("unknown category {:?}", raw)))
}

/// Numbers and numeric strings are accepted and rounded to the nearest integer.
/// Out of range values are rejected rather than clamped.
fn parse_priority_score(obj: &Map<String, Value>) -> Result<u8, ExtractionError> {
    let score = match obj.get("priorityScore") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Null) | None => return Err(invalid("priorityScore", "missing")),
        Some(_) => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| invalid("priorityScore", "not a number"))?
    .round();

    if !(MIN_PRIORITY_SCORE..=MAX_PRIORITY_SCORE).contains(&score) {
        return Err(invalid("priorityScore", format!("{} is outside 0-100", score)));
    }

    Ok(score as u8)
}

fn parse_summary(obj: &Map<String, Value>) -> Result<String, ExtractionError> {
    match obj.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(invalid("summary", "empty")),
        Some(Value::Null) | None => Err(invalid("summary", "missing")),
        Some(_) => Err(invalid("summary", "not a string")),
    }
}

fn parse_string_list(
    obj: &Map<String, Value>,
    field: &'static str,
    optional: bool,
) -> Result<Vec<String>, ExtractionError> {
    let items = match obj.get(field) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None if optional => return Ok(vec![]),
        Some(Value::Null) | None => return Err(invalid(field, "missing")),
        Some(_) => return Err(invalid(field, "not an array")),
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.trim().to_string()),
            other => Err(invalid(field, format!("non-string item {}", other))),
        })
        .collect()
}

#[derive(Debug, Display)]
pub enum AnalysisFailure {
    #[display("model invocation failed: {_0}")]
    Generate(GenerateError),
    #[display("model response unusable: {_0}")]
    Extract(ExtractionError),
}

/// Runs prompt, model call and extraction. Never fails: any upstream or
/// parsing problem is logged and answered with the fallback analysis.
pub async fn analyze_email(
    generator: &dyn TextGenerator,
    request: &AnalysisRequest,
    max_body_chars: usize,
    timeout: Duration,
) -> AnalysisOutcome {
    tracing::info!("Analyzing email from: {}", request.sender_name());

    match try_analyze(generator, request, max_body_chars, timeout).await {
        Ok(analysis) => AnalysisOutcome {
            analysis,
            source: AnalysisSource::Model,
        },
        Err(e) => {
            match &e {
                AnalysisFailure::Generate(GenerateError::MissingCredentials) => {
                    tracing::error!("{}, check GEMINI_API_KEY", e)
                }
                AnalysisFailure::Generate(GenerateError::QuotaExceeded(_)) => {
                    tracing::error!("{}, check model API usage", e)
                }
                _ => tracing::warn!("{}, using fallback", e),
            }
            AnalysisOutcome {
                analysis: EmailAnalysis::fallback(request.sender_name(), &request.subject),
                source: AnalysisSource::Fallback,
            }
        }
    }
}

async fn try_analyze(
    generator: &dyn TextGenerator,
    request: &AnalysisRequest,
    max_body_chars: usize,
    timeout: Duration,
) -> Result<EmailAnalysis, AnalysisFailure> {
    let prompt = build_analysis_prompt(request, max_body_chars);
    let text = generate_with_timeout(generator, &prompt, timeout)
        .await
        .map_err(AnalysisFailure::Generate)?;

    tracing::debug!(
        "Model response preview: {}",
        truncate_chars(&text, RESPONSE_PREVIEW_CHARS)
    );

    extract_analysis(&text).map_err(AnalysisFailure::Extract)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::ScriptedGenerator;
    use serde_json::json;

    const VALID: &str = r#"{
        "category": "meeting",
        "priorityScore": 72,
        "summary": "Quarterly planning moved to Thursday.",
        "keyPoints": ["Thursday 10am", "Room 4B"],
        "actionItems": ["Update calendar"]
    }"#;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            sender: Some("boss@example.com".to_string()),
            subject: "Planning moved".to_string(),
            body: "We moved planning to Thursday.".to_string(),
        }
    }

    fn expected() -> EmailAnalysis {
        EmailAnalysis {
            category: Category::Meeting,
            priority_score: 72,
            summary: "Quarterly planning moved to Thursday.".to_string(),
            key_points: vec!["Thursday 10am".to_string(), "Room 4B".to_string()],
            action_items: vec!["Update calendar".to_string()],
        }
    }

    #[test]
    fn test_prompt_states_shape() {
        let prompt = build_analysis_prompt(&request(), 10_000);
        assert!(prompt.starts_with("Analyze this email and respond ONLY with a valid JSON object"));
        assert!(prompt.contains("From: boss@example.com\nSubject: Planning moved\nBody: We moved"));
        assert!(prompt.contains(
            "\"category\": \"one of: promotion, receipt, update, meeting, social, personal, important, other\""
        ));
        assert!(prompt.contains("\"priorityScore\": number between 0-100"));
        assert!(prompt.contains("\"keyPoints\""));
        assert!(prompt.contains("\"actionItems\""));
        assert!(prompt.ends_with("Respond with ONLY the JSON object, nothing else."));
    }

    #[test]
    fn test_prompt_truncates_body_and_defaults_sender() {
        let req = AnalysisRequest {
            sender: None,
            subject: "Long".to_string(),
            body: format!("{}{}", "a".repeat(20), "b".repeat(20)),
        };
        let prompt = build_analysis_prompt(&req, 20);
        assert!(prompt.contains("From: Unknown\n"));
        assert!(prompt.contains(&format!("Body: {}\n", "a".repeat(20))));
        assert!(!prompt.contains("abbb"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(
            build_analysis_prompt(&request(), 2_000),
            build_analysis_prompt(&request(), 2_000)
        );
    }

    #[test]
    fn test_extract_bare_json() {
        assert_eq!(extract_analysis(VALID).unwrap(), expected());
    }

    #[test]
    fn test_extract_fenced_json_matches_bare() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert_eq!(extract_analysis(&fenced).unwrap(), extract_analysis(VALID).unwrap());

        let fenced_no_tag = format!("```\n{}\n```\n", VALID);
        assert_eq!(extract_analysis(&fenced_no_tag).unwrap(), expected());
    }

    #[test]
    fn test_extract_keeps_backticks_inside_values() {
        let text = r#"{"category": "update", "priorityScore": 40, "summary": "Run ```cargo test``` before merging", "keyPoints": ["Use `--release`"]}"#;
        let analysis = extract_analysis(text).unwrap();
        assert_eq!(analysis.summary, "Run ```cargo test``` before merging");
        assert_eq!(analysis.key_points, vec!["Use `--release`".to_string()]);

        let fenced = format!("```json\n{}\n```", text);
        assert_eq!(extract_analysis(&fenced).unwrap(), analysis);
    }

    #[test]
    fn test_extract_json_surrounded_by_prose() {
        let text = format!("Sure! Here is the analysis:\n{}\nLet me know if you need more.", VALID);
        assert_eq!(extract_analysis(&text).unwrap(), expected());
    }

    #[test]
    fn test_extract_without_json() {
        assert_eq!(
            extract_analysis("I cannot help with that."),
            Err(ExtractionError::NoJsonObject)
        );
    }

    #[test]
    fn test_extract_broken_json() {
        let result = extract_analysis(r#"{"category": "meeting", "priorityScore": }"#);
        assert!(matches!(result, Err(ExtractionError::InvalidJson(_))));
    }

    #[test]
    fn test_validate_defaults_action_items() {
        let analysis = validate_analysis(&json!({
            "category": "Receipt",
            "priorityScore": 10,
            "summary": "Order confirmation",
            "keyPoints": []
        }))
        .unwrap();
        assert_eq!(analysis.category, Category::Receipt);
        assert!(analysis.key_points.is_empty());
        assert!(analysis.action_items.is_empty());

        let analysis = validate_analysis(&json!({
            "category": "receipt",
            "priorityScore": 10,
            "summary": "Order confirmation",
            "keyPoints": ["Total $12"],
            "actionItems": null
        }))
        .unwrap();
        assert!(analysis.action_items.is_empty());
    }

    #[test]
    fn test_validate_priority_score_policy() {
        let with_score = |score: Value| {
            validate_analysis(&json!({
                "category": "update",
                "priorityScore": score,
                "summary": "s",
                "keyPoints": []
            }))
        };

        assert_eq!(with_score(json!(0)).unwrap().priority_score, 0);
        assert_eq!(with_score(json!(100)).unwrap().priority_score, 100);
        assert_eq!(with_score(json!(42.6)).unwrap().priority_score, 43);
        assert_eq!(with_score(json!("65")).unwrap().priority_score, 65);
        assert_eq!(with_score(json!(100.4)).unwrap().priority_score, 100);

        assert!(with_score(json!(101)).is_err());
        assert!(with_score(json!(100.6)).is_err());
        assert!(with_score(json!(-1)).is_err());
        assert!(with_score(json!("high")).is_err());
        assert!(with_score(json!(true)).is_err());
        assert!(with_score(json!(null)).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let base = json!({
            "category": "social",
            "priorityScore": 20,
            "summary": "Party",
            "keyPoints": ["Saturday"]
        });

        let mut v = base.clone();
        v["category"] = json!("newsletter");
        assert!(matches!(
            validate_analysis(&v),
            Err(ExtractionError::InvalidField { field: "category", .. })
        ));

        let mut v = base.clone();
        v["summary"] = json!("   ");
        assert!(matches!(
            validate_analysis(&v),
            Err(ExtractionError::InvalidField { field: "summary", .. })
        ));

        let mut v = base.clone();
        v["keyPoints"] = json!("Saturday");
        assert!(validate_analysis(&v).is_err());

        let mut v = base.clone();
        v.as_object_mut().unwrap().remove("keyPoints");
        assert!(validate_analysis(&v).is_err());

        let mut v = base.clone();
        v["actionItems"] = json!([1, 2]);
        assert!(matches!(
            validate_analysis(&v),
            Err(ExtractionError::InvalidField { field: "actionItems", .. })
        ));

        assert!(validate_analysis(&base).is_ok());
    }

    #[tokio::test]
    async fn test_analyze_email_success() {
        let generator = ScriptedGenerator::replying(&format!("```json\n{}\n```", VALID));
        let outcome = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;

        assert_eq!(outcome.source, AnalysisSource::Model);
        assert_eq!(outcome.analysis, expected());
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_email_falls_back_without_json() {
        let generator = ScriptedGenerator::replying("Sorry, I can't do that.");
        let outcome = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;

        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert_eq!(outcome.analysis.category, Category::Other);
        assert_eq!(outcome.analysis.priority_score, 50);
        assert_eq!(
            outcome.analysis.summary,
            "Email from boss@example.com: Planning moved"
        );
    }

    #[tokio::test]
    async fn test_analyze_email_falls_back_when_blocked() {
        let generator = ScriptedGenerator::failing(GenerateError::Blocked("SAFETY".to_string()));
        let outcome = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;

        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert_eq!(
            outcome.analysis,
            EmailAnalysis::fallback("boss@example.com", "Planning moved")
        );
    }

    #[tokio::test]
    async fn test_analyze_email_falls_back_on_out_of_range_score() {
        let generator = ScriptedGenerator::replying(
            r#"{"category":"important","priorityScore":150,"summary":"Urgent","keyPoints":["Now"]}"#,
        );
        let outcome = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;
        assert_eq!(outcome.source, AnalysisSource::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_email_falls_back_on_timeout() {
        let generator = ScriptedGenerator::replying(VALID).with_delay(Duration::from_secs(120));
        let outcome = analyze_email(&generator, &request(), 10_000, Duration::from_secs(30)).await;
        assert_eq!(outcome.source, AnalysisSource::Fallback);
    }

    #[tokio::test]
    async fn test_analyze_email_is_idempotent() {
        let generator = ScriptedGenerator::replying(VALID);
        let first = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;
        let second = analyze_email(&generator, &request(), 10_000, Duration::from_secs(5)).await;

        assert_eq!(first, second);
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
    }
}
