//! Two-tier embedding cache backing the similarity method.
//!
//! Keys are `sha256(model + "\n" + text)`. The memory tier is a strict LRU
//! guarded by a mutex; the optional disk tier keeps one file per key and
//! evicts by last access once over its byte budget. A disk hit is promoted
//! into memory.

pub mod disk;
pub mod memory;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use disk::{DiskEntryMeta, DiskTier};
pub use memory::MemoryLru;

use crate::errors::ConcordResult;
use crate::fingerprint::sha256_hex;
use crate::providers::EmbeddingClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingCacheConfig {
    pub memory_capacity: usize,
    /// Disk tier is disabled when unset.
    pub disk_dir: Option<PathBuf>,
    pub disk_max_bytes: u64,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1024,
            disk_dir: None,
            disk_max_bytes: 256 * 1024 * 1024,
        }
    }
}

pub fn embed_cache_key(model_id: &str, text: &str) -> String {
    sha256_hex(&format!("{model_id}\n{text}"))
}

/// Cosine similarity. Zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> anyhow::Result<f64> {
    if a.len() != b.len() {
        anyhow::bail!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        );
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityOutcome {
    pub similarity: f64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// How many of the two embeddings came from the cache.
    pub cache_hits: usize,
    pub model: String,
}

pub struct EmbeddingCache {
    memory: Mutex<MemoryLru>,
    disk: Option<DiskTier>,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn memory_only(capacity: usize) -> Self {
        Self {
            memory: Mutex::new(MemoryLru::new(capacity)),
            disk: None,
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn from_config(config: &EmbeddingCacheConfig) -> ConcordResult<Self> {
        let mut cache = Self::memory_only(config.memory_capacity);
        if let Some(dir) = &config.disk_dir {
            cache.disk = Some(DiskTier::open(dir.clone(), config.disk_max_bytes).await?);
        }
        Ok(cache)
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Keys currently held in memory, least recently used first.
    pub fn memory_keys(&self) -> Vec<String> {
        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys_lru_order()
    }

    pub async fn get(&self, model_id: &str, text: &str) -> Option<Vec<f32>> {
        let key = embed_cache_key(model_id, text);
        let hit = self
            .memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key);
        if hit.is_some() {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        if let Some(disk) = &self.disk {
            if let Some(vector) = disk.get(&key).await {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                self.memory
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .put(&key, vector.clone());
                return Some(vector);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn put(&self, model_id: &str, text: &str, vector: Vec<f32>) -> ConcordResult<()> {
        let key = embed_cache_key(model_id, text);
        if let Some(disk) = &self.disk {
            disk.put(&key, model_id, text, &vector).await?;
        }
        let evicted = self
            .memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(&key, vector);
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "embedding memory tier eviction");
        }
        Ok(())
    }

    /// Fetches both embeddings, computing only the misses in one batch.
    pub async fn similarity(
        &self,
        client: &dyn EmbeddingClient,
        a: &str,
        b: &str,
    ) -> anyhow::Result<SimilarityOutcome> {
        let model = client.model_id();
        let texts = [a, b];
        let mut vectors: [Option<Vec<f32>>; 2] = [None, None];
        let mut cache_hits = 0;

        for (slot, text) in vectors.iter_mut().zip(texts) {
            *slot = self.get(&model, text).await;
            if slot.is_some() {
                cache_hits += 1;
            }
        }

        let mut misses: Vec<String> = Vec::new();
        for (slot, text) in vectors.iter().zip(texts) {
            if slot.is_none() && !misses.iter().any(|m| m == text) {
                misses.push(text.to_string());
            }
        }

        let (mut cost_usd, mut latency_ms) = (0.0, 0);
        if !misses.is_empty() {
            let resp = client.embed(&misses).await?;
            if resp.vectors.len() != misses.len() {
                anyhow::bail!(
                    "embedding client returned {} vectors for {} inputs",
                    resp.vectors.len(),
                    misses.len()
                );
            }
            cost_usd = resp.cost_usd;
            latency_ms = resp.latency_ms;
            for (text, vector) in misses.iter().zip(resp.vectors) {
                if let Err(e) = self.put(&model, text, vector.clone()).await {
                    warn!(error = %e, "failed to cache embedding");
                }
                for (slot, t) in vectors.iter_mut().zip(texts) {
                    if slot.is_none() && t == text.as_str() {
                        *slot = Some(vector.clone());
                    }
                }
            }
        }

        let [Some(va), Some(vb)] = vectors else {
            anyhow::bail!("embedding unavailable after compute");
        };
        Ok(SimilarityOutcome {
            similarity: cosine_similarity(&va, &vb)?,
            cost_usd,
            latency_ms,
            cache_hits,
            model,
        })
    }
}
