//! Embedding Cache
//!
//! Avoids re-embedding identical text within a process, for example when a
//! document is re-ingested or a question is asked twice.
//!
//! Keys are SHA-256 hashes of the vectorizer name and the text, so two
//! vectorizers never share an entry.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner {
    entries: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU cache of embedding vectors.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` vectors (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn compute_key(vectorizer: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(vectorizer.as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, vectorizer: &str, text: &str) -> Option<Vec<f32>> {
        let key = Self::compute_key(vectorizer, text);
        let mut inner = self.inner.lock();
        match inner.entries.get(&key).cloned() {
            Some(vector) => {
                inner.hits += 1;
                Some(vector)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, vectorizer: &str, text: &str, vector: Vec<f32>) {
        let key = Self::compute_key(vectorizer, text);
        self.inner.lock().entries.put(key, vector);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_vectorizer() {
        let a = EmbeddingCache::compute_key("tfidf", "hello");
        let b = EmbeddingCache::compute_key("openai", "hello");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, EmbeddingCache::compute_key("tfidf", "hello"));
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = EmbeddingCache::new(4);
        assert!(cache.get("tfidf", "a").is_none());
        cache.put("tfidf", "a", vec![1.0, 0.0]);
        assert_eq!(cache.get("tfidf", "a"), Some(vec![1.0, 0.0]));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entry_count), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EmbeddingCache::new(2);
        cache.put("v", "a", vec![1.0]);
        cache.put("v", "b", vec![2.0]);
        cache.get("v", "a");
        cache.put("v", "c", vec![3.0]);

        assert!(cache.get("v", "b").is_none());
        assert!(cache.get("v", "a").is_some());
        assert!(cache.get("v", "c").is_some());
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let cache = EmbeddingCache::new(0);
        cache.put("v", "a", vec![1.0]);
        assert_eq!(cache.stats().entry_count, 1);
        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
