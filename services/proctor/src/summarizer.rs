//! Recruiter-facing analysis summaries.
//!
//! Builds a per-type breakdown of a session's events, asks the remote
//! text-generation capability for 2-3 neutral sentences, and falls back to a
//! deterministic template when the capability fails. Summary generation
//! always produces some string; it never raises to the caller.

use crate::config::SummaryConfig;
use crate::events::IntegrityEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

const NO_ACTIVITY_SUMMARY: &str = "No suspicious activity was detected during this interview.";

/// Errors from the remote text-generation capability.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Text generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Text generation API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Text generation response contained no text")]
    EmptyResponse,
}

/// Black-box text-generation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, SummaryError>;
}

/// Builds summaries from events and a precomputed cheat score.
pub struct SummaryGenerator {
    model: Arc<dyn TextModel>,
}

impl SummaryGenerator {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// Generate a summary for a session.
    ///
    /// Returns the fixed neutral sentence when no events were recorded,
    /// the model's prose on success, and a deterministic template on any
    /// model failure.
    pub async fn generate(&self, events: &[IntegrityEvent], cheat_score: f64) -> String {
        if events.is_empty() {
            return NO_ACTIVITY_SUMMARY.to_string();
        }

        let breakdown = build_breakdown(events);
        let prompt = build_prompt(cheat_score, &breakdown);

        match self.model.generate(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                error!(error = %e, "Summary generation failed, using fallback");
                format!(
                    "Integrity score: {}/1.0. Automated summary unavailable.",
                    cheat_score
                )
            }
        }
    }
}

/// One line per distinct event type, in first-seen order.
pub fn build_breakdown(events: &[IntegrityEvent]) -> String {
    let mut counts: Vec<(&str, u64)> = Vec::new();
    for event in events {
        match counts.iter_mut().find(|(t, _)| *t == event.event_type) {
            Some((_, count)) => *count += 1,
            None => counts.push((event.event_type.as_str(), 1)),
        }
    }

    counts
        .iter()
        .map(|(event_type, count)| format!("- {}: {} time(s)", title_case(event_type), count))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(cheat_score: f64, breakdown: &str) -> String {
    format!(
        "You are an AI interview integrity analyst.\n\
         Based on the following behavioral events detected during a remote interview,\n\
         write a concise 2-3 sentence professional summary for a recruiter.\n\
         Be factual and neutral in tone.\n\
         \n\
         Integrity Score: {}/1.0\n\
         Detected Events:\n\
         {}\n\
         \n\
         Summary:",
        cheat_score, breakdown
    )
}

/// "gaze_away" -> "Gaze Away"
fn title_case(event_type: &str) -> String {
    event_type
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Gemini client
// ============================================================================

/// HTTP client for the Gemini generateContent API.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    /// Create a client from configuration.
    pub fn new(config: &SummaryConfig) -> Result<Self, SummaryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, SummaryError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let request = GenerateRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SummaryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await?;

        let text: String = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(SummaryError::EmptyResponse);
        }

        Ok(text)
    }
}
