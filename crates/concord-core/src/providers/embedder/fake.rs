use super::{EmbedResponse, EmbeddingClient};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Deterministic hashed bag-of-words embedder.
///
/// Texts sharing words get similar vectors; fixed vectors can be pinned per
/// text for exact similarity scenarios.
#[derive(Clone)]
pub struct FakeEmbedder {
    pub model: String,
    dims: usize,
    overrides: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
    texts_embedded: Arc<AtomicUsize>,
    fail_with: Option<String>,
}

impl FakeEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            dims: 64,
            overrides: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            texts_embedded: Arc::new(AtomicUsize::new(0)),
            fail_with: None,
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    /// Number of `embed` invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of individual texts embedded across all calls.
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.overrides.get(text) {
            return v.clone();
        }
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            v[(u64::from_le_bytes(idx) % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<EmbedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            token_usage: texts.iter().map(|t| t.len() as u32 / 4).sum(),
            latency_ms: 0,
            cost_usd: 0.0,
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
