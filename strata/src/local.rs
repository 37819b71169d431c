use crate::domain::StoreValue;
use moka::future::Cache;
use shared::config::LocalSettings;
use shared::{Error, Result};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tracing::warn;

/// Moka-based in-process tier of one cache
///
/// Moka coalesces concurrent initialisations of the same key: the first caller
/// runs the loader, every other caller for that key waits and receives the
/// same result (or the same error). Different keys never wait on each other.
pub struct LocalStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Debug + Send + Sync + Clone + 'static,
{
    cache: Cache<K, StoreValue<V>>,
}

impl<K, V> LocalStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Debug + Send + Sync + Clone + 'static,
{
    /// Create a local store named after its cache
    pub fn new(name: &str, settings: &LocalSettings) -> Self {
        let mut builder = Cache::builder().name(name);

        if settings.initial_capacity > 0 {
            builder = builder.initial_capacity(settings.initial_capacity);
        }

        if settings.maximum_size > 0 {
            builder = builder.max_capacity(settings.maximum_size);
        }

        if settings.expire_after_write > Duration::ZERO {
            builder = builder.time_to_live(settings.expire_after_write);
        }

        if settings.expire_after_access > Duration::ZERO {
            builder = builder.time_to_idle(settings.expire_after_access);
        }

        if settings.refresh_after_write > Duration::ZERO {
            // Refreshing needs a per-cache loader, which callers pass per call instead
            warn!(
                "cache '{}': refresh_after_write is not supported by the local tier and is ignored",
                name
            );
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Return the cached value or run `init` once for all concurrent callers of this key.
    ///
    /// An `Err` from `init` leaves the key absent.
    pub async fn get_or_compute<F>(&self, key: K, init: F) -> Result<StoreValue<V>>
    where
        F: Future<Output = Result<StoreValue<V>>>,
    {
        self.cache
            .try_get_with(key, init)
            .await
            .map_err(|shared| (*shared).clone())
    }

    /// Insert the result of `init` only if the key is absent.
    ///
    /// Returns the entry's value and whether this call ran `init`.
    pub async fn insert_if_absent<F>(&self, key: K, init: F) -> Result<(StoreValue<V>, bool)>
    where
        F: Future<Output = Result<StoreValue<V>>>,
    {
        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(init)
            .await
            .map_err(|shared: std::sync::Arc<Error>| (*shared).clone())?;
        let fresh = entry.is_fresh();
        Ok((entry.into_value(), fresh))
    }

    pub async fn get(&self, key: &K) -> Option<StoreValue<V>> {
        self.cache.get(key).await
    }

    pub async fn put(&self, key: K, value: StoreValue<V>) {
        self.cache.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries; pending maintenance may lag behind
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl<K, V> Debug for LocalStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Debug + Send + Sync + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("name", &self.cache.name())
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
