use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{GeocoderConfig, MAX_CACHE_TTL_SECS};
use crate::models::{CacheEntry, CacheKey};

/// Read-through store for parsed upstream responses.
///
/// Entries expire after `ttl`. Once more than `max_entries` are held the
/// oldest insertions are evicted. A zero TTL turns the cache off.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: ttl.min(Duration::from_secs(MAX_CACHE_TTL_SECS)),
            max_entries,
        }
    }

    pub fn from_config(config: &GeocoderConfig) -> Self {
        Self::new(config.cache_ttl(), config.cache_max_entries)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero() && self.max_entries > 0
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.payload.clone()),
            _ => None,
        }
    }

    pub async fn insert(&self, key: CacheKey, payload: Value) {
        if !self.is_enabled() {
            return;
        }
        let now = Instant::now();
        let Some(expires_at) = now.checked_add(self.ttl) else {
            return;
        };
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| now < entry.expires_at);
        entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: now,
                expires_at,
            },
        );

        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                    debug!("Evicted oldest cache entry");
                }
                None => break,
            }
        }
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| now < entry.expires_at)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
