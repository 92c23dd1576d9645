use super::{EmbedResponse, EmbeddingClient};
use crate::errors::{ProviderError, ProviderErrorKind};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

pub struct OpenAIEmbeddingClient {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// USD per 1k input tokens.
    pub price_per_1k: f64,
    pub client: reqwest::Client,
}

impl OpenAIEmbeddingClient {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            price_per_1k: 0.0,
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

    pub fn with_pricing(mut self, price_per_1k: f64) -> Self {
        self.price_per_1k = price_per_1k;
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<EmbedResponse> {
        if texts.is_empty() {
            return Ok(EmbedResponse::default());
        }
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "input": texts,
            "model": self.model,
            "encoding_format": "float"
        });

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
            return Err(ProviderError::classify_message(format!(
                "OpenAI embeddings API error (status {}): {}",
                status.as_u16(),
                error_text
            ))
            .with_provider("openai")
            .with_status(status.as_u16())
            .into());
        }

        let json: serde_json::Value = resp.json().await?;
        let data = json
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Parse, "response missing data")
                    .with_provider("openai")
            })?;

        // Entries carry their input index; do not rely on array order.
        let mut vectors = vec![Vec::new(); texts.len()];
        for entry in data {
            let idx = entry.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let floats: Vec<f32> = entry
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
                .unwrap_or_default();
            if let Some(slot) = vectors.get_mut(idx) {
                *slot = floats;
            }
        }
        if vectors.iter().any(Vec::is_empty) {
            return Err(ProviderError::new(
                ProviderErrorKind::Parse,
                "response missing embedding for an input",
            )
            .with_provider("openai")
            .into());
        }

        let token_usage = json
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Ok(EmbedResponse {
            vectors,
            token_usage,
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd: f64::from(token_usage) / 1000.0 * self.price_per_1k,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
