use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    prompting::{render_tutor_prompt, TutorPromptContext},
};

/// Outcome of a completion request. Every failure collapses to `Unavailable`
/// so callers only have one fallback branch to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Completed(String),
    Unavailable,
}

/// Extra context the prompt builder can use alongside the mode label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptHints {
    pub subject: Option<String>,
    pub exam_date: Option<String>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, context_label: &str, hints: &PromptHints)
        -> Completion;

    /// Whether a request could succeed at all (credentials present).
    fn is_configured(&self) -> bool;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.ai_timeout + Duration::from_secs(1))
            .build()?;
        Ok(Self {
            http,
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            base_url: config.openai_base_url.clone(),
        })
    }

    async fn chat_completion_text(&self, system: &str, user: &str) -> AppResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY not configured".to_string()))?;

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ],
                "max_tokens": 500,
                "temperature": 0.7
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Ai(format!("completion service returned {status}: {body}")));
        }

        let payload = response.json::<Value>().await?;
        extract_message_content(&payload)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        context_label: &str,
        hints: &PromptHints,
    ) -> Completion {
        if self.api_key.is_none() {
            debug!(context_label, "completion skipped: no api key");
            return Completion::Unavailable;
        }

        let system = render_tutor_prompt(&TutorPromptContext {
            bot_name: "GOAT Bot",
            mode: context_label,
            subject: hints.subject.as_deref(),
            exam_date: hints.exam_date.as_deref(),
        });

        match self.chat_completion_text(&system, prompt).await {
            Ok(text) => {
                debug!(
                    context_label,
                    prompt_len = prompt.len(),
                    reply_len = text.len(),
                    model = %self.model,
                    "completion generated"
                );
                Completion::Completed(text)
            }
            Err(err) => {
                warn!(context_label, error = %err, "completion failed");
                Completion::Unavailable
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

pub fn extract_message_content(payload: &Value) -> AppResult<String> {
    let text = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if text.is_empty() {
        return Err(AppError::Ai("completion response had empty content".to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_read_from_first_choice() {
        let payload = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  Step 1: isolate x.  " } },
                { "message": { "content": "ignored" } }
            ]
        });
        assert_eq!(
            extract_message_content(&payload).expect("content present"),
            "Step 1: isolate x."
        );
    }

    #[test]
    fn malformed_or_empty_bodies_are_errors() {
        assert!(extract_message_content(&json!({})).is_err());
        assert!(extract_message_content(&json!({ "choices": [] })).is_err());
        assert!(extract_message_content(
            &json!({ "choices": [{ "message": { "content": "   " } }] })
        )
        .is_err());
        assert!(extract_message_content(&json!({ "choices": [{ "message": { "content": 7 } }] }))
            .is_err());
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_without_a_request() {
        let client = OpenAiClient::from_config(&AppConfig::default()).expect("client builds");
        assert!(!client.is_configured());
        let outcome = client
            .complete("what is 2 + 2", "general", &PromptHints::default())
            .await;
        assert_eq!(outcome, Completion::Unavailable);
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let config = AppConfig {
            openai_api_key: Some("sk-test".to_string()),
            // Port 9 (discard) on loopback refuses connections.
            openai_base_url: "http://127.0.0.1:9/v1".to_string(),
            ai_timeout: Duration::from_secs(1),
            ..AppConfig::default()
        };
        let client = OpenAiClient::from_config(&config).expect("client builds");
        let outcome = client
            .complete("hello", "homework_help", &PromptHints::default())
            .await;
        assert_eq!(outcome, Completion::Unavailable);
    }
}
