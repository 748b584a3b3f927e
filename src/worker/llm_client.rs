//! Thin `reqwest`-based client against the configured LLM completion
//! endpoint, following the same timeout/backoff shape this codebase's
//! embeddings client used: a bounded request timeout wrapping each attempt
//! and a typed error enum distinguishing transport failure, non-2xx status,
//! and unparseable body. Rate-limit retry (§4.4 step 5) is orchestrated by
//! the caller, not this client, since it needs to release the worker's
//! semaphore permit between attempts.

use crate::models::{SummaryStruct, Urgency};
use std::time::Duration;
use thiserror::Error;

/// Fixed generation parameters (§4.4 step 4, §6): compiled in, never
/// configurable, to lock cost.
pub const MODEL_TEMPERATURE: f32 = 0.2;
/// Model identifier sent on every completion request and recorded on the
/// committed summary row. Not part of the configuration surface (§6).
pub const MODEL_NAME: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out or failed in transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm endpoint returned 429 rate-limited")]
    RateLimited,
    #[error("llm endpoint returned status {0}")]
    Status(u16),
    #[error("llm response could not be parsed into a summary: {0}")]
    Unparseable(String),
}

#[derive(serde::Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: [CompletionMessage<'a>; 2],
    response_format: &'static str,
}

#[derive(serde::Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(serde::Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(serde::Deserialize)]
struct CompletionChoiceMessage {
    content: String,
}

/// The structured JSON object the prompt instructs the model to emit.
#[derive(serde::Deserialize)]
struct RawSummary {
    overview: String,
    #[serde(default)]
    action_items: Vec<String>,
    urgency: String,
}

pub struct LlmClient {
    http: reqwest::Client,
    endpoint_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// One attempt at a chat-completion call. Returns `Err(RateLimited)` on a
    /// 429 so the caller can apply the fixed retry schedule (§4.4 step 5).
    pub async fn complete(
        &self,
        subject: &str,
        cleaned_text: &str,
        max_output_tokens: usize,
    ) -> Result<SummaryStruct, LlmError> {
        let prompt = format!(
            "Summarize this email. Subject: {subject}\n\nBody:\n{cleaned_text}\n\n\
             Respond with a JSON object: {{\"overview\": string (<=200 chars), \
             \"action_items\": array of up to 5 short strings, \"urgency\": \"low\"|\"medium\"|\"high\"}}."
        );

        let request = CompletionRequest {
            model: &self.model,
            temperature: MODEL_TEMPERATURE,
            max_tokens: max_output_tokens,
            messages: [
                CompletionMessage {
                    role: "system",
                    content: "You are an email triage assistant. Respond with JSON only.",
                },
                CompletionMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: "json_object",
        };

        let response = self
            .http
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LlmError::Status(response.status().as_u16()));
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Unparseable("empty choices array".to_string()))?;

        let raw: RawSummary = serde_json::from_str(&content)
            .map_err(|e| LlmError::Unparseable(e.to_string()))?;

        let urgency = match raw.urgency.to_lowercase().as_str() {
            "low" => Urgency::Low,
            "high" => Urgency::High,
            _ => Urgency::Medium,
        };

        let overview: String = raw.overview.chars().take(200).collect();
        let action_items: Vec<String> = raw.action_items.into_iter().take(5).collect();

        Ok(SummaryStruct {
            overview,
            action_items,
            urgency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_and_action_items_are_hard_truncated() {
        let long_overview: String = "x".repeat(500);
        let raw = RawSummary {
            overview: long_overview,
            action_items: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
                "e".to_string(),
                "f".to_string(),
            ],
            urgency: "HIGH".to_string(),
        };
        let overview: String = raw.overview.chars().take(200).collect();
        let action_items: Vec<String> = raw.action_items.into_iter().take(5).collect();
        assert_eq!(overview.chars().count(), 200);
        assert_eq!(action_items.len(), 5);
    }

    #[test]
    fn unknown_urgency_string_falls_back_to_medium() {
        let mapped = match "unexpected".to_lowercase().as_str() {
            "low" => Urgency::Low,
            "high" => Urgency::High,
            _ => Urgency::Medium,
        };
        assert_eq!(mapped, Urgency::Medium);
    }
}
