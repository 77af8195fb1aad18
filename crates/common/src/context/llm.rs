//! Language-model capability used by the synthesizer
//!
//! Provides:
//! - `LanguageModel` trait (one completion per call, never retried)
//! - OpenAI-compatible chat completions client
//! - Deterministic mock for offline runs and tests

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sampling options for one completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2000,
        }
    }
}

/// Text generation primitive
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a completion for a system and user message
    async fn complete(&self, system: &str, user: &str, options: &CompletionOptions) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAIChatModel {
    pub fn new(endpoint: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, endpoint, api_key, model })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    async fn complete(&self, system: &str, user: &str, options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Synthesis {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Synthesis {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| AppError::Synthesis {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Synthesis {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic model that echoes the question and cites every source block
#[derive(Default)]
pub struct MockLanguageModel {
    calls: AtomicUsize,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completions requested so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, _system: &str, user: &str, _options: &CompletionOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let question = user
            .lines()
            .find_map(|line| line.strip_prefix("Question: "))
            .unwrap_or("your question");

        let mut cited: Vec<&str> = Vec::new();
        for name in user
            .lines()
            .filter_map(|line| line.strip_prefix("--- SOURCE: "))
            .filter_map(|rest| rest.strip_suffix(" ---"))
        {
            if !cited.contains(&name) {
                cited.push(name);
            }
        }

        let citations = cited
            .iter()
            .map(|name| format!("[{}]", name))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "Summary of trends for \"{}\" drawn from {}.\n\n[Mock response - LLM API key not configured]",
            question, citations
        ))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Create a language model from configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIChatModel::new(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
                config.timeout(),
            )?))
        }
        "mock" => Ok(Arc::new(MockLanguageModel::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_cites_sources_once() {
        let model = MockLanguageModel::new();
        let user = "Question: What changes in retail?\n\nSOURCE DOCUMENTS:\n\n\
                    --- SOURCE: Retail Outlook ---\nchunk one\n\n\
                    --- SOURCE: Retail Outlook ---\nchunk two\n\n\
                    --- SOURCE: Consumer 2026 ---\nchunk three";

        let answer = model.complete("system", user, &CompletionOptions::default()).await.unwrap();

        assert!(answer.contains("What changes in retail?"));
        assert!(answer.contains("[Retail Outlook], [Consumer 2026]"));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_create_language_model() {
        let mut config = LlmConfig::default();
        config.provider = "mock".to_string();
        assert_eq!(create_language_model(&config).unwrap().model_name(), "mock");

        config.provider = "openai".to_string();
        config.api_key = None;
        assert!(create_language_model(&config).is_err());

        config.provider = "palm".to_string();
        assert!(create_language_model(&config).is_err());
    }

    #[test]
    fn test_chat_response_without_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
