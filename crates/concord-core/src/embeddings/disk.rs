//! On-disk embedding tier.
//!
//! Layout: `<root>/<key[..2]>/<key>.json` per entry plus `<root>/index.json`
//! holding access metadata. Entry and index writes go through a temp file
//! and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{ConcordError, ConcordResult};
use crate::fingerprint::sha256_hex;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntryMeta {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Tie-breaker for accesses within the same clock tick.
    pub access_seq: u64,
    pub size_bytes: u64,
    pub model: String,
    /// First 16 hex chars of the text hash; never the text itself.
    pub text_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskIndex {
    next_seq: u64,
    entries: BTreeMap<String, DiskEntryMeta>,
}

impl DiskIndex {
    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|m| m.size_bytes).sum()
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    model: String,
    vector: Vec<f32>,
}

pub struct DiskTier {
    root: PathBuf,
    max_bytes: u64,
    index: Mutex<DiskIndex>,
}

impl DiskTier {
    pub async fn open(root: impl Into<PathBuf>, max_bytes: u64) -> ConcordResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            ConcordError::cache(format!("failed to create cache directory: {}", e))
        })?;

        let index = match fs::read_to_string(root.join(INDEX_FILE)).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "embedding cache index is corrupt, starting empty");
                DiskIndex::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DiskIndex::default(),
            Err(e) => {
                return Err(ConcordError::cache(format!(
                    "failed to read cache index: {}",
                    e
                )))
            }
        };

        Ok(Self {
            root,
            max_bytes,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.root.join(shard).join(format!("{key}.json"))
    }

    pub async fn total_bytes(&self) -> u64 {
        self.index.lock().await.total_bytes()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.index.lock().await.entries.contains_key(key)
    }

    /// Keys from least to most recently accessed.
    pub async fn keys_by_access(&self) -> Vec<String> {
        let index = self.index.lock().await;
        let mut keys: Vec<(&DiskEntryMeta, &String)> =
            index.entries.iter().map(|(k, m)| (m, k)).collect();
        keys.sort_by(|(a, _), (b, _)| {
            (a.last_accessed, a.access_seq).cmp(&(b.last_accessed, b.access_seq))
        });
        keys.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Corrupt or vanished entries are dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut index = self.index.lock().await;
        index.entries.get(key)?;
        let path = self.entry_path(key);

        let parsed = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<DiskEntry>(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let entry = match parsed {
            Ok(entry) => entry,
            Err(reason) => {
                warn!(key, reason = %reason, "dropping unreadable embedding cache entry");
                let _ = fs::remove_file(&path).await;
                index.entries.remove(key);
                self.persist_index(&index).await.ok();
                return None;
            }
        };

        let seq = index.bump();
        if let Some(meta) = index.entries.get_mut(key) {
            meta.last_accessed = Utc::now();
            meta.access_seq = seq;
        }
        if let Err(e) = self.persist_index(&index).await {
            warn!(error = %e, "failed to refresh embedding cache index");
        }
        Some(entry.vector)
    }

    pub async fn put(&self, key: &str, model: &str, text: &str, vector: &[f32]) -> ConcordResult<()> {
        let body = serde_json::to_string(&DiskEntry {
            model: model.to_string(),
            vector: vector.to_vec(),
        })
        .map_err(|e| ConcordError::cache(format!("failed to serialize entry: {}", e)))?;

        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ConcordError::cache(format!("failed to create shard directory: {}", e))
            })?;
        }

        let mut index = self.index.lock().await;
        write_atomic(&path, &body).await?;

        let now = Utc::now();
        let seq = index.bump();
        let created_at = index
            .entries
            .get(key)
            .map(|m| m.created_at)
            .unwrap_or(now);
        index.entries.insert(
            key.to_string(),
            DiskEntryMeta {
                created_at,
                last_accessed: now,
                access_seq: seq,
                size_bytes: body.len() as u64,
                model: model.to_string(),
                text_hash: sha256_hex(text)[..16].to_string(),
            },
        );

        self.evict_over_budget(&mut index).await;
        self.persist_index(&index).await
    }

    async fn evict_over_budget(&self, index: &mut DiskIndex) {
        while index.total_bytes() > self.max_bytes {
            let oldest = index
                .entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    (a.last_accessed, a.access_seq).cmp(&(b.last_accessed, b.access_seq))
                })
                .map(|(k, _)| k.clone());
            let Some(key) = oldest else {
                break;
            };
            let _ = fs::remove_file(self.entry_path(&key)).await;
            index.entries.remove(&key);
            debug!(key = %key, "evicted embedding cache entry");
        }
    }

    async fn persist_index(&self, index: &DiskIndex) -> ConcordResult<()> {
        let raw = serde_json::to_string_pretty(index)
            .map_err(|e| ConcordError::cache(format!("failed to serialize index: {}", e)))?;
        write_atomic(&self.root.join(INDEX_FILE), &raw).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> ConcordResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| ConcordError::cache(format!("failed to write temp file: {}", e)))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| ConcordError::cache(format!("failed to rename temp file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(n: u8) -> String {
        sha256_hex(&format!("k{n}"))
    }

    #[tokio::test]
    async fn entries_are_sharded_by_prefix() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 1 << 20).await.unwrap();
        let k = key(1);
        tier.put(&k, "m", "hello", &[0.5, 0.25]).await.unwrap();

        let expected = dir.path().join(&k[..2]).join(format!("{k}.json"));
        assert!(expected.exists());
        assert!(dir.path().join(INDEX_FILE).exists());
        assert_eq!(tier.get(&k).await, Some(vec![0.5, 0.25]));
    }

    #[tokio::test]
    async fn overflow_evicts_least_recently_accessed_first() {
        let dir = TempDir::new().unwrap();
        let probe = serde_json::to_string(&DiskEntry {
            model: "m".into(),
            vector: vec![1.0; 8],
        })
        .unwrap()
        .len() as u64;
        // Room for exactly three entries.
        let tier = DiskTier::open(dir.path(), probe * 3).await.unwrap();

        for n in 1..=3 {
            tier.put(&key(n), "m", "t", &[1.0; 8]).await.unwrap();
        }
        // Touch the oldest so the second becomes the eviction candidate.
        assert!(tier.get(&key(1)).await.is_some());
        tier.put(&key(4), "m", "t", &[1.0; 8]).await.unwrap();

        assert!(!tier.contains(&key(2)).await);
        assert!(tier.total_bytes().await <= probe * 3);
        assert_eq!(tier.keys_by_access().await, vec![key(3), key(1), key(4)]);

        tier.put(&key(5), "m", "t", &[1.0; 8]).await.unwrap();
        assert!(!tier.contains(&key(3)).await);
    }

    #[tokio::test]
    async fn corrupt_entry_is_deleted_not_surfaced() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 1 << 20).await.unwrap();
        let k = key(7);
        tier.put(&k, "m", "t", &[1.0]).await.unwrap();

        let path = dir.path().join(&k[..2]).join(format!("{k}.json"));
        std::fs::write(&path, "{ not json").unwrap();

        assert!(tier.get(&k).await.is_none());
        assert!(!path.exists());
        assert!(!tier.contains(&k).await);
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let tier = DiskTier::open(dir.path(), 1 << 20).await.unwrap();
            tier.put(&key(1), "m", "t", &[2.0]).await.unwrap();
        }
        let tier = DiskTier::open(dir.path(), 1 << 20).await.unwrap();
        assert_eq!(tier.get(&key(1)).await, Some(vec![2.0]));
    }
}
