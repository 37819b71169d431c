use crate::glob;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use shared::{Result, TtlMs};
use strata::ports::RemoteStore;
use tokio::time::Instant;

struct Entry {
    payload: Bytes,
    ttl: TtlMs,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-based remote store with per-key expiry
///
/// Expired keys are dropped lazily when read or matched. Clones share the
/// same map, so one store can back several registries.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    entries: std::sync::Arc<DashMap<String, Entry>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL the live key was last written with
    pub fn ttl_of(&self, key: &str) -> Option<TtlMs> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.ttl)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.ttl_of(key).is_some()
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.payload.clone()));
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: TtlMs) -> Result<()> {
        let entry = Entry {
            payload: value,
            ttl,
            expires_at: Instant::now() + ttl.as_duration(),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob::matches(pattern, key));
        tracing::debug!(
            "Deleted {} keys matching '{}'",
            before.saturating_sub(self.entries.len()),
            pattern
        );
        Ok(())
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
