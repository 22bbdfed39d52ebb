//! Semantic completion cache.
//!
//! The key is `(agent, org, env, sha256(normalized_intent)[:16])` where
//! normalization lower-cases, trims, and collapses whitespace. Backends
//! are interchangeable; the in-memory one is an LRU with TTL that also
//! counts the tokens it saved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::traits::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lower-case, trim, and collapse internal whitespace runs to a single
/// space. Two intents that normalize identically share a cache entry.
pub fn normalize_intent(intent: &str) -> String {
    intent
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cache_key(agent: &str, org_id: Uuid, env: &str, intent: &str) -> String {
    let digest = Sha256::digest(normalize_intent(intent).as_bytes());
    format!("{agent}:{org_id}:{env}:{}", &hex::encode(digest)[..16])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cached completion, returned by value.
#[derive(Debug, Clone)]
pub struct CachedCompletion {
    pub text: String,
    pub usage: Usage,
    /// How many times this entry has been served (including this time).
    pub hit_count: u64,
}

/// Interchangeable cache backend (in-memory LRU, distributed KV, ...).
pub trait CompletionCache: Send + Sync {
    /// Look up and, on hit, bump the entry's hit count.
    fn get(&self, key: &str) -> Option<CachedCompletion>;
    fn put(&self, key: &str, text: String, usage: Usage);
    /// Total tokens served from cache instead of the provider.
    fn tokens_saved(&self) -> u64;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory LRU backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    text: String,
    usage: Usage,
    hit_count: u64,
    cached_at: Instant,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, Entry>,
    /// Monotonic use counter driving LRU eviction.
    tick: u64,
}

pub struct InMemoryCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
    tokens_saved: AtomicU64,
}

impl InMemoryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            ttl,
            capacity: capacity.max(1),
            tokens_saved: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompletionCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<CachedCompletion> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let ttl = self.ttl;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.cached_at.elapsed() >= ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.hit_count += 1;
        entry.last_used = tick;
        let cached = CachedCompletion {
            text: entry.text.clone(),
            usage: entry.usage,
            hit_count: entry.hit_count,
        };
        self.tokens_saved
            .fetch_add(u64::from(entry.usage.total()), Ordering::Relaxed);
        Some(cached)
    }

    fn put(&self, key: &str, text: String, usage: Usage) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.insert(
            key.to_string(),
            Entry {
                text,
                usage,
                hit_count: 0,
                cached_at: Instant::now(),
                last_used: tick,
            },
        );

        // Evict the least-recently-used entry when over capacity.
        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn tokens_saved(&self) -> u64 {
        self.tokens_saved.load(Ordering::Relaxed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn usage() -> Usage {
        Usage { input_tokens: 100, output_tokens: 50 }
    }

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_intent("  Apply   Security\tPatches \n"),
            "apply security patches"
        );
        assert_eq!(normalize_intent("apply security patches"), "apply security patches");
    }

    #[test]
    fn equal_normalized_intents_share_a_key() {
        let org = Uuid::new_v4();
        let a = cache_key("patch", org, "production", "Apply security patches");
        let b = cache_key("patch", org, "production", "  apply  SECURITY patches ");
        assert_eq!(a, b);
    }

    #[test]
    fn key_varies_by_agent_org_env() {
        let org = Uuid::new_v4();
        let base = cache_key("patch", org, "production", "apply patches");
        assert_ne!(base, cache_key("drift", org, "production", "apply patches"));
        assert_ne!(base, cache_key("patch", Uuid::new_v4(), "production", "apply patches"));
        assert_ne!(base, cache_key("patch", org, "staging", "apply patches"));
    }

    #[test]
    fn hit_returns_same_content_and_counts() {
        let cache = InMemoryCache::new(Duration::from_secs(900), 16);
        cache.put("k", "plan-body".into(), usage());

        let first = cache.get("k").unwrap();
        assert_eq!(first.text, "plan-body");
        assert_eq!(first.hit_count, 1);

        let second = cache.get("k").unwrap();
        assert_eq!(second.text, "plan-body");
        assert_eq!(second.hit_count, 2);
    }

    #[test]
    fn miss_returns_none() {
        let cache = InMemoryCache::new(Duration::from_secs(900), 16);
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn ttl_expiry() {
        let cache = InMemoryCache::new(Duration::from_millis(0), 16);
        cache.put("k", "v".into(), usage());
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn tokens_saved_accumulates_on_hits() {
        let cache = InMemoryCache::new(Duration::from_secs(900), 16);
        cache.put("k", "v".into(), usage());
        assert_eq!(cache.tokens_saved(), 0);
        cache.get("k");
        cache.get("k");
        assert_eq!(cache.tokens_saved(), 300);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = InMemoryCache::new(Duration::from_secs(900), 2);
        cache.put("a", "1".into(), usage());
        cache.put("b", "2".into(), usage());
        // Touch "a" so "b" becomes the LRU entry.
        cache.get("a");
        cache.put("c", "3".into(), usage());

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }
}
