use std::collections::{BTreeMap, HashMap};

/// Fixed-capacity strict LRU. A hit promotes the entry to most recent.
#[derive(Debug, Default)]
pub struct MemoryLru {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (Vec<f32>, u64)>,
    order: BTreeMap<u64, String>,
}

impl MemoryLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn touch(&mut self, key: &str) -> Option<u64> {
        self.tick += 1;
        let tick = self.tick;
        let (_, slot) = self.entries.get_mut(key)?;
        let old = std::mem::replace(slot, tick);
        self.order.remove(&old);
        self.order.insert(tick, key.to_string());
        Some(tick)
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        self.touch(key)?;
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    /// Inserts or refreshes `key`, evicting least-recently-used entries.
    pub fn put(&mut self, key: &str, vector: Vec<f32>) -> Vec<String> {
        if self.capacity == 0 {
            return Vec::new();
        }
        if let Some((v, _)) = self.entries.get_mut(key) {
            *v = vector;
            self.touch(key);
            return Vec::new();
        }

        self.tick += 1;
        self.entries.insert(key.to_string(), (vector, self.tick));
        self.order.insert(self.tick, key.to_string());

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_in_strict_lru_order() {
        let mut lru = MemoryLru::new(2);
        lru.put("a", vec![1.0]);
        lru.put("b", vec![2.0]);
        assert_eq!(lru.get("a"), Some(vec![1.0]));

        let evicted = lru.put("c", vec![3.0]);
        assert_eq!(evicted, vec!["b".to_string()]);
        assert_eq!(lru.keys_lru_order(), vec!["a", "c"]);
        assert!(lru.get("b").is_none());
    }

    #[test]
    fn overwrite_refreshes_recency() {
        let mut lru = MemoryLru::new(2);
        lru.put("a", vec![1.0]);
        lru.put("b", vec![2.0]);
        lru.put("a", vec![9.0]);
        lru.put("c", vec![3.0]);
        assert_eq!(lru.get("a"), Some(vec![9.0]));
        assert!(lru.get("b").is_none());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut lru = MemoryLru::new(0);
        lru.put("a", vec![1.0]);
        assert!(lru.is_empty());
    }
}
