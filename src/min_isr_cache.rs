//! Bounded, TTL-keyed cache of per-topic `min.insync.replicas` (C4).
//!
//! Reading a topic's min-ISR configuration on every health check would mean
//! one `describe_configs` round trip per topic per tick; instead we keep a
//! small LRU of recently-seen values and only refetch once an entry's age
//! exceeds its retention window.

#[cfg(test)]
#[path = "min_isr_cache_test.rs"]
mod min_isr_cache_test;

use std::num::NonZeroUsize;
use std::sync::RwLock;

use lru::LruCache;

use crate::config::MinIsrCacheConfig;
use crate::types::{AdminInterface, AdminInterfaceError};

const MIN_INSYNC_REPLICAS_CONFIG_KEY: &str = "min.insync.replicas";
const DEFAULT_MIN_INSYNC_REPLICAS: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    min_isr: u32,
    fetched_at_ms: u64,
}

#[derive(Debug)]
struct CacheData {
    entries: LruCache<String, CacheEntry>,
}

/// Caches `min.insync.replicas` by topic name, evicting the least recently
/// used entry once `cache_size` is exceeded and treating an entry as stale
/// once it's older than `cache_retention_ms`.
#[derive(Debug)]
pub struct MinIsrCache {
    data: RwLock<CacheData>,
    retention_ms: u64,
}

impl MinIsrCache {
    pub fn new(config: &MinIsrCacheConfig) -> Self {
        let size = NonZeroUsize::new(config.cache_size.max(1)).unwrap();
        Self { data: RwLock::new(CacheData { entries: LruCache::new(size) }), retention_ms: config.cache_retention_ms }
    }

    /// Returns the cached value if present and not stale at `now_ms`.
    fn fresh(&self, topic: &str, now_ms: u64) -> Option<u32> {
        let mut d = self.data.write().expect("min-isr cache lock poisoned");
        let entry = *d.entries.get(topic)?;
        if now_ms.saturating_sub(entry.fetched_at_ms) > self.retention_ms {
            return None;
        }
        Some(entry.min_isr)
    }

    fn insert(&self, topic: &str, min_isr: u32, now_ms: u64) {
        let mut d = self.data.write().expect("min-isr cache lock poisoned");
        d.entries.put(topic.to_string(), CacheEntry { min_isr, fetched_at_ms: now_ms });
    }

    /// Returns the cached `min.insync.replicas` for each topic, fetching
    /// (and caching) any topic that is missing or stale. Topics whose
    /// config lookup fails entirely are omitted rather than failing the
    /// whole batch, since a single misbehaving topic shouldn't block ISR
    /// checks for the rest of the cluster.
    pub async fn get_or_fetch(
        &self,
        topics: &[String],
        now_ms: u64,
        admin: &dyn AdminInterface,
    ) -> Result<std::collections::HashMap<String, u32>, AdminInterfaceError> {
        let mut result = std::collections::HashMap::with_capacity(topics.len());
        let mut to_fetch = Vec::new();
        for topic in topics {
            match self.fresh(topic, now_ms) {
                Some(v) => {
                    result.insert(topic.clone(), v);
                }
                None => to_fetch.push(topic.clone()),
            }
        }
        if to_fetch.is_empty() {
            return Ok(result);
        }
        let fetched = admin.describe_configs(to_fetch).await?;
        for (topic, configs) in fetched {
            let min_isr = configs
                .get(MIN_INSYNC_REPLICAS_CONFIG_KEY)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(DEFAULT_MIN_INSYNC_REPLICAS);
            self.insert(&topic, min_isr, now_ms);
            result.insert(topic, min_isr);
        }
        Ok(result)
    }

    /// Drop a topic's cached entry, e.g. after observing a config-alter
    /// event or a topic deletion.
    pub fn invalidate(&self, topic: &str) {
        self.data.write().expect("min-isr cache lock poisoned").entries.pop(topic);
    }

    pub fn clear(&self) {
        self.data.write().expect("min-isr cache lock poisoned").entries.clear();
    }
}
