//! Chat-completion clients for the analyst and the label reader.
//!
//! - **OpenAI** (and OpenAI-compatible servers): `POST {url}/chat/completions`
//!   with `Authorization: Bearer $KEY`. The key is read from the environment
//!   variable named by `api_key_env` once, at construction.
//! - **Ollama**: `POST {url}/api/chat` with `stream: false`.
//! - **Disabled**: every call fails with [`ModelError::Disabled`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, OcrConfig};
use crate::traits::{ChatMessage, LanguageModel, ModelError};

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Ollama,
}

/// Connection settings shared by the analyst model and the OCR model.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub provider: Provider,
    pub model: String,
    pub url: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatSettings {
    /// `None` when the provider is disabled.
    pub fn from_llm(config: &LlmConfig) -> anyhow::Result<Option<Self>> {
        let Some(provider) = parse_provider(&config.provider)? else {
            return Ok(None);
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for {} provider", config.provider))?;
        Ok(Some(Self {
            provider,
            model,
            url: config.url.clone(),
            api_key_env: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }))
    }

    /// `None` when the provider is disabled.
    pub fn from_ocr(config: &OcrConfig) -> anyhow::Result<Option<Self>> {
        let Some(provider) = parse_provider(&config.provider)? else {
            return Ok(None);
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ocr.model required for {} provider", config.provider))?;
        Ok(Some(Self {
            provider,
            model,
            url: config.url.clone(),
            api_key_env: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: 2,
            temperature: 0.0,
            max_tokens: 2000,
        }))
    }
}

fn parse_provider(name: &str) -> anyhow::Result<Option<Provider>> {
    match name {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Provider::OpenAI)),
        "ollama" => Ok(Some(Provider::Ollama)),
        other => bail!("Unknown model provider: {}", other),
    }
}

/// A chat-completion endpoint with retry/backoff.
pub struct ChatModel {
    settings: ChatSettings,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    /// Ask the server for a JSON-only response.
    json_mode: bool,
}

impl ChatModel {
    /// # Errors
    ///
    /// Fails if the OpenAI provider is selected and the API key variable is
    /// not set, or the HTTP client cannot be built.
    pub fn new(settings: ChatSettings, json_mode: bool) -> anyhow::Result<Self> {
        let api_key = match settings.provider {
            Provider::OpenAI => Some(std::env::var(&settings.api_key_env).map_err(|_| {
                anyhow::anyhow!("{} environment variable not set", settings.api_key_env)
            })?),
            Provider::Ollama => std::env::var(&settings.api_key_env).ok(),
        };

        let endpoint = match settings.provider {
            Provider::OpenAI => format!(
                "{}/chat/completions",
                settings.url.as_deref().unwrap_or(OPENAI_URL).trim_end_matches('/')
            ),
            Provider::Ollama => format!(
                "{}/api/chat",
                settings.url.as_deref().unwrap_or(OLLAMA_URL).trim_end_matches('/')
            ),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            settings,
            client,
            endpoint,
            api_key,
            json_mode,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model
    }

    /// A user message carrying an image, in this provider's wire format.
    pub fn image_message(&self, prompt: &str, image_b64: &str, mime: &str) -> Value {
        match self.settings.provider {
            Provider::OpenAI => json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{}", mime, image_b64) }
                    }
                ]
            }),
            Provider::Ollama => json!({
                "role": "user",
                "content": prompt,
                "images": [image_b64],
            }),
        }
    }

    fn request_body(&self, messages: Vec<Value>) -> Value {
        match self.settings.provider {
            Provider::OpenAI => {
                let mut body = json!({
                    "model": self.settings.model,
                    "messages": messages,
                    "temperature": self.settings.temperature,
                    "max_tokens": self.settings.max_tokens,
                });
                if self.json_mode {
                    body["response_format"] = json!({ "type": "json_object" });
                }
                body
            }
            Provider::Ollama => {
                let mut body = json!({
                    "model": self.settings.model,
                    "messages": messages,
                    "stream": false,
                    "options": {
                        "temperature": self.settings.temperature,
                        "num_predict": self.settings.max_tokens,
                    },
                });
                if self.json_mode {
                    body["format"] = json!("json");
                }
                body
            }
        }
    }

    /// Send raw wire-format messages and return the assistant text.
    pub async fn send(&self, messages: Vec<Value>) -> Result<String, ModelError> {
        let body = self.request_body(messages);
        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .map_err(|e| ModelError::BadResponse(e.to_string()))?;
                        return self.extract_content(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, model = %self.settings.model, "model call failed, retrying");
                        last_err = Some(ModelError::Request(format!("HTTP {}: {}", status, body_text)));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    return Err(ModelError::Request(format!("HTTP {}: {}", status, body_text)));
                }
                Err(e) => {
                    warn!(attempt, error = %e, model = %self.settings.model, "model call failed, retrying");
                    last_err = Some(ModelError::Request(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ModelError::Request("model call failed after retries".into())))
    }

    fn extract_content(&self, json: &Value) -> Result<String, ModelError> {
        let content = match self.settings.provider {
            Provider::OpenAI => json
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            Provider::Ollama => json.pointer("/message/content").and_then(Value::as_str),
        };
        let content = content
            .ok_or_else(|| ModelError::BadResponse("missing message content".to_string()))?;
        debug!(chars = content.len(), "model responded");
        Ok(content.to_string())
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let wire = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        self.send(wire).await
    }
}

/// Used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
        Err(ModelError::Disabled)
    }
}

/// Build the analyst model from configuration.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match ChatSettings::from_llm(config)? {
        None => Ok(Arc::new(DisabledModel)),
        Some(settings) => Ok(Arc::new(ChatModel::new(settings, true)?)),
    }
}
