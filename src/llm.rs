//! Completion provider abstraction and implementations.
//!
//! Defines the [`CompletionProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — every call fails; used when no model is configured.
//! - **[`OllamaProvider`]** — calls a local Ollama server with retry and backoff.
//!
//! Use [`create_provider`] to instantiate the right provider from config.
//!
//! # Retry Strategy
//!
//! The Ollama provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! All failures surface as [`PipelineError::CollaboratorUnavailable`]: a
//! broken model endpoint is fatal to the turn and is never fed into the
//! repair loop.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::PipelineError;

/// Sampling knobs forwarded with each completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

impl CompletionOptions {
    /// Near-deterministic settings used for SQL generation and
    /// classification, where creative sampling is a liability.
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Trait for text-completion backends.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"llama3.1"`).
    fn model_name(&self) -> &str;

    /// Complete a prompt, returning the model's text.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, PipelineError>;
}

// ============ Disabled Provider ============

/// A no-op provider that always reports the collaborator as unavailable.
///
/// Used when `llm.provider = "disabled"`; the pipeline still serves
/// greetings and annotations, and degrades everywhere else.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, PipelineError> {
        Err(PipelineError::unavailable("completion provider is disabled"))
    }
}

// ============ Ollama Provider ============

/// Completion provider backed by a local Ollama server.
///
/// Calls `POST {base_url}/api/generate` with `stream: false` and returns
/// the `response` field of the reply.
pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            PipelineError::unavailable(format!("malformed Ollama reply: {}", e))
                        })?;
                        let text = json
                            .get("response")
                            .and_then(|r| r.as_str())
                            .ok_or_else(|| {
                                PipelineError::unavailable("Ollama reply missing response field")
                            })?;
                        debug!(model = %self.model, chars = text.len(), "completion received");
                        return Ok(text.trim().to_string());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("Ollama error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::unavailable(format!(
                        "Ollama error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(PipelineError::unavailable(
            last_err.unwrap_or_else(|| "completion failed after retries".to_string()),
        ))
    }
}

/// Create the appropriate [`CompletionProvider`] based on configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "disabled" => Ok(Box::new(DisabledProvider)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider_is_unavailable() {
        let provider = DisabledProvider;
        let err = provider
            .complete("hello", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CollaboratorUnavailable { .. }));
        assert!(!err.is_repairable());
    }

    #[test]
    fn test_create_provider_dispatch() {
        let disabled = LlmConfig::default();
        assert_eq!(create_provider(&disabled).unwrap().model_name(), "disabled");

        let unknown = LlmConfig {
            provider: "gpt9".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_provider(&unknown).is_err());

        let ollama_without_model = LlmConfig {
            provider: "ollama".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_provider(&ollama_without_model).is_err());
    }

    #[test]
    fn test_ollama_trims_trailing_slash() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: Some("llama3.1".to_string()),
            base_url: "http://localhost:11434/".to_string(),
            ..LlmConfig::default()
        };
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.model_name(), "llama3.1");
    }
}
