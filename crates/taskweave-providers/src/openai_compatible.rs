//! Unified OpenAI-compatible chat client.
//!
//! A single struct that performs one-shot chat completions against any
//! OpenAI-compatible API. Different backends are distinguished only by
//! endpoint URL and API key.

use async_trait::async_trait;
use serde_json::{Value, json};

use taskweave_core::config::LlmConfig;
use taskweave_core::error::{Result, TaskweaveError};
use taskweave_core::traits::ChatClient;

/// A chat client that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleClient {
    /// Backend name (e.g., "openai", "groq", "ollama").
    name: String,
    /// API key for bearer authentication; empty for local servers.
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    /// Path for chat completions (e.g., "/chat/completions").
    chat_path: String,
    /// Model ID sent with every request.
    model: String,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Create from LLM configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            name: config.provider.clone(),
            api_key: config.api_key.clone(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            chat_path: config.chat_path.clone(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Apply bearer auth when an API key is present.
    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let url = format!("{}{}", self.base_url, self.chat_path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            TaskweaveError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(TaskweaveError::Provider(format!(
                "{} API error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| TaskweaveError::Http(e.to_string()))?;

        // Zero choices is the one hard pipeline error; the caller never
        // absorbs it into a degraded fallback.
        let choice = json["choices"]
            .get(0)
            .ok_or_else(|| TaskweaveError::EmptyResponse(self.name.clone()))?;

        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        tracing::debug!(
            "{} chat done: {} chars out ({} chars prompt)",
            self.name,
            content.len(),
            system_prompt.len() + user_prompt.len()
        );

        Ok(content)
    }
}
