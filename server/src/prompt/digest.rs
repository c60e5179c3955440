use std::time::Duration;

use indexmap::IndexMap;
use indoc::formatdoc;
use serde::{Deserialize, Serialize};

use crate::model::analysis::AnalysisSource;

use super::generator::{generate_with_timeout, TextGenerator};

pub const EMPTY_DIGEST: &str = "No emails to summarize today.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEmail {
    #[serde(default)]
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub subject: String,
    pub category: String,
}

impl DigestEmail {
    fn display_sender(&self) -> &str {
        self.sender_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.sender_email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestOutcome {
    pub digest: String,
    pub source: AnalysisSource,
}

pub fn build_digest_prompt(emails: &[DigestEmail], max_emails: usize) -> String {
    let email_list = emails
        .iter()
        .take(max_emails)
        .map(|e| format!("- {}: {} ({})", e.display_sender(), e.subject, e.category))
        .collect::<Vec<_>>()
        .join("\n");

    formatdoc! {"
        Create a friendly daily email digest summary for these {count} emails:

        {email_list}

        Generate a concise overview (2-3 sentences) highlighting the most important items and overall themes.
        Respond with plain text, no markdown or formatting.",
        count = emails.len(),
    }
}

/// Per-category counts in the order each category first appears
pub fn fallback_digest(emails: &[DigestEmail]) -> String {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for email in emails {
        *counts.entry(email.category.as_str()).or_default() += 1;
    }

    let breakdown = counts
        .iter()
        .map(|(category, count)| format!("{} {}", count, category))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You received {} emails today: {}. Check your dashboard for details.",
        emails.len(),
        breakdown
    )
}

pub async fn generate_digest(
    generator: &dyn TextGenerator,
    emails: &[DigestEmail],
    max_emails: usize,
    timeout: Duration,
) -> DigestOutcome {
    if emails.is_empty() {
        return DigestOutcome {
            digest: EMPTY_DIGEST.to_string(),
            source: AnalysisSource::Model,
        };
    }

    tracing::info!("Generating digest for {} emails", emails.len());
    let prompt = build_digest_prompt(emails, max_emails);

    match generate_with_timeout(generator, &prompt, timeout).await {
        Ok(text) => DigestOutcome {
            digest: text.trim().to_string(),
            source: AnalysisSource::Model,
        },
        Err(e) => {
            tracing::warn!("Digest generation failed: {}, using fallback", e);
            DigestOutcome {
                digest: fallback_digest(emails),
                source: AnalysisSource::Fallback,
            }
        }
    }
}
