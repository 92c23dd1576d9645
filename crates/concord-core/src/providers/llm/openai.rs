use super::{ChatRequest, ChatResponse, ModelClient, TokenUsage};
use crate::errors::{ProviderError, ProviderErrorKind};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIChatClient {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// USD per 1k prompt tokens.
    pub input_price_per_1k: f64,
    /// USD per 1k completion tokens.
    pub output_price_per_1k: f64,
    pub client: reqwest::Client,
}

impl OpenAIChatClient {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            input_price_per_1k: 0.0,
            output_price_per_1k: 0.0,
            client: reqwest::Client::new(),
        }
    }

    /// Reads the key from `CONCORD_OPENAI_API_KEY`.
    pub fn from_env(model: String) -> anyhow::Result<Self> {
        Ok(Self::new(model, crate::providers::api_key_from_env()?))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_price_per_1k = input_per_1k;
        self.output_price_per_1k = output_per_1k;
        self
    }

    fn cost(&self, usage: TokenUsage) -> f64 {
        f64::from(usage.prompt_tokens) / 1000.0 * self.input_price_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * self.output_price_per_1k
    }
}

#[async_trait]
impl ModelClient for OpenAIChatClient {
    async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Network
                };
                ProviderError::new(kind, e.to_string()).with_provider("openai")
            })?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let err = ProviderError::classify_message(format!(
                "OpenAI chat API error (status {}): {}",
                status.as_u16(),
                error_text
            ))
            .with_provider("openai")
            .with_status(status.as_u16());
            return Err(err.into());
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Parse, e.to_string()).with_provider("openai")
        })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Parse, "response missing content")
                    .with_provider("openai")
            })?
            .to_string();
        let usage = TokenUsage {
            prompt_tokens: json
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: json
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        };
        let model = json
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(ChatResponse {
            text,
            token_usage: usage,
            latency_ms,
            cost_usd: self.cost(usage),
            model,
            provider: "openai".to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_follows_pricing() {
        let client = OpenAIChatClient::new("gpt-4o-mini".into(), "k".into()).with_pricing(1.0, 2.0);
        let cost = client.cost(TokenUsage {
            prompt_tokens: 500,
            completion_tokens: 250,
        });
        assert!((cost - 1.0).abs() < 1e-12);
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = OpenAIChatClient::new("m".into(), "k".into()).with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
