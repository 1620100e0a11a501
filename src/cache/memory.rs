//! In-process cache client.
//!
//! Entries live in a bounded LRU and expire lazily: an expired entry is dropped
//! on the first read after its deadline.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;

use super::backend::{CacheBackend, CacheError};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    pub fn new(limit: NonZeroUsize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(limit)),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
            None => return Ok(None),
        }
        entries.pop(key);
        Ok(None)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.or(self.default_ttl);
        let entry = Entry {
            value: value.to_vec(),
            // A deadline past what `Instant` can represent never expires.
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };

        let evicted = mutex_lock(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if evicted.is_some_and(|(evicted_key, _)| evicted_key != key) {
            counter!("jinja_bridge_cache_evict_total").increment(1);
        }
        Ok(())
    }
}
