use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod fake;
pub mod openai;

pub use fake::FakeEmbedder;
pub use openai::OpenAIEmbeddingClient;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmbedResponse {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    pub token_usage: u32,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<EmbedResponse>;
    fn name(&self) -> &'static str;
    fn model_id(&self) -> String;
}
