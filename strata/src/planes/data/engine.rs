use crate::codec::{Codec, JsonCodec};
use crate::domain::{CacheValue, StoreValue};
use crate::events::{Change, Envelope};
use crate::jitter::{ExpiryWindow, RandomSource, SharedRng};
use crate::key::{CacheKey, KeyConverters};
use crate::local::LocalStore;
use crate::ports::{Bus, RemoteStore};
use shared::config::CacheSettings;
use shared::{BoxError, Error, Result};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collaborators shared by every engine of a registry
pub struct CacheContext<C = JsonCodec> {
    pub remote: Arc<dyn RemoteStore>,
    pub bus: Arc<dyn Bus>,
    pub codec: Arc<C>,
    pub converters: Arc<KeyConverters>,
    pub random: Arc<dyn RandomSource>,
}

impl CacheContext<JsonCodec> {
    /// JSON codec, no extra key converters, OS-seeded random source
    pub fn new(remote: Arc<dyn RemoteStore>, bus: Arc<dyn Bus>) -> Self {
        Self {
            remote,
            bus,
            codec: Arc::new(JsonCodec),
            converters: Arc::new(KeyConverters::new()),
            random: Arc::new(SharedRng::from_os_rng()),
        }
    }
}

impl<C: Codec> CacheContext<C> {
    pub fn with_codec<C2: Codec>(self, codec: C2) -> CacheContext<C2> {
        CacheContext {
            remote: self.remote,
            bus: self.bus,
            codec: Arc::new(codec),
            converters: self.converters,
            random: self.random,
        }
    }

    pub fn with_converters(mut self, converters: KeyConverters) -> Self {
        self.converters = Arc::new(converters);
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }
}

impl<C> Clone for CacheContext<C> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            bus: self.bus.clone(),
            codec: self.codec.clone(),
            converters: self.converters.clone(),
            random: self.random.clone(),
        }
    }
}

/// Remote key prefix of a cache: `prefix:name::`, or `name::` without a global prefix.
pub fn key_prefix(cache_name: &str, global_prefix: Option<&str>) -> String {
    match global_prefix.filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}:{cache_name}::"),
        None => format!("{cache_name}::"),
    }
}

/// Two-tier cache for one cache name
///
/// Reads go local first and fall through to the remote store; writes go to
/// the remote store, are announced on the bus, then applied locally. The
/// read/write lock only orders structural operations against reads; filling
/// a missing key is single-flighted by the local store itself.
pub struct CacheEngine<K, V, C = JsonCodec>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    name: String,
    key_prefix: String,
    topic: String,
    expiry: ExpiryWindow,
    allow_null_values: bool,
    lock: RwLock<()>,
    local: LocalStore<K, V>,
    context: CacheContext<C>,
}

impl<K, V, C> CacheEngine<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    /// Create an engine; fails if the cache's remote expiration is not positive
    pub fn new(
        name: impl Into<String>,
        settings: &CacheSettings,
        context: CacheContext<C>,
    ) -> Result<Self> {
        let name = name.into();
        let expiry = ExpiryWindow::new(
            settings.remote.expiration_for(&name),
            settings.remote.expire_offset,
        )
        .map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("cache '{}': {}", name, msg)),
            other => other,
        })?;

        Ok(Self {
            key_prefix: key_prefix(&name, settings.cache_prefix.as_deref()),
            topic: settings.remote.topic.clone(),
            expiry,
            allow_null_values: settings.cache_null_values,
            lock: RwLock::new(()),
            local: LocalStore::new(&name, &settings.local),
            context,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn expiry_window(&self) -> ExpiryWindow {
        self.expiry
    }

    pub fn allows_null_values(&self) -> bool {
        self.allow_null_values
    }

    /// Full remote key for `key`
    pub fn remote_key(&self, key: &K) -> Result<String> {
        let converted = self.context.converters.stringify(key)?;
        Ok(format!("{}{}", self.key_prefix, converted))
    }

    /// Probe the local tier only, never loading
    pub async fn get_local(&self, key: &K) -> Option<StoreValue<V>> {
        self.local.get(key).await
    }

    pub fn local_entry_count(&self) -> u64 {
        self.local.entry_count()
    }

    /// Read-only probe: local tier, then the remote tier on a miss.
    ///
    /// A remote hit is cached locally but not announced.
    pub async fn lookup(&self, key: &K) -> Result<Option<StoreValue<V>>> {
        let _read = self.lock.read().await;

        match self
            .local
            .get_or_compute(key.clone(), self.fetch_remote(key))
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read through both tiers, running `loader` when neither has the key.
    ///
    /// Concurrent calls for the same missing key share one load. A remote hit
    /// and a loaded value are both announced to peers with a refresh.
    pub async fn get<F, Fut, E>(&self, key: K, loader: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let _read = self.lock.read().await;

        let mut pending = Some(loader);
        loop {
            let load = self.load_pending(&key, &mut pending);
            match self.local.get_or_compute(key.clone(), load).await {
                Ok(value) => return Ok(value.into_value()),
                // shared a miss from a concurrent lookup; our loader has not run yet
                Err(Error::NotFound) if pending.is_some() => continue,
                // loader produced nothing and null values are not cached
                Err(Error::NotFound) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Write to the remote tier, announce a refresh, then update the local tier
    pub async fn put(&self, key: K, value: Option<V>) -> Result<()> {
        let _write = self.lock.write().await;

        let value = self.to_store_value(value)?;
        let remote_key = self.remote_key(&key)?;
        self.write_remote(&remote_key, &value).await?;
        self.publish(Envelope::refresh(self.name.clone(), key.clone(), value.clone()))
            .await?;
        self.local.put(key, value).await;
        Ok(())
    }

    /// Install `value` unless the local tier already holds the key.
    ///
    /// Returns the value already present, or `None` when this call ran the
    /// install. The install follows the `get` path, so a value found in the
    /// remote tier wins over `value` and the call still reports `None`.
    pub async fn put_if_absent(&self, key: K, value: Option<V>) -> Result<Option<StoreValue<V>>> {
        let mut pending = Some(move || async move { Ok::<_, Infallible>(value) });
        loop {
            let load = self.load_pending(&key, &mut pending);
            match self.local.insert_if_absent(key.clone(), load).await {
                Ok((_, true)) => return Ok(None),
                Ok((previous, false)) => return Ok(Some(previous)),
                Err(Error::NotFound) if pending.is_some() => continue,
                Err(Error::NotFound) => return Err(Error::NullValueRejected(self.name.clone())),
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete from the remote tier, announce an evict, drop the local entry
    pub async fn evict(&self, key: &K) -> Result<()> {
        let _write = self.lock.write().await;
        self.evict_locked(key).await
    }

    /// Evict only if `lookup` finds the key in either tier
    pub async fn evict_if_present(&self, key: &K) -> Result<bool> {
        if self.lookup(key).await?.is_none() {
            return Ok(false);
        }

        let _write = self.lock.write().await;
        self.evict_locked(key).await?;
        Ok(true)
    }

    /// Delete every remote key of this cache, announce a clear, empty the local tier
    pub async fn clear(&self) -> Result<()> {
        let _write = self.lock.write().await;

        let pattern = format!("{}*", self.key_prefix);
        self.context.remote.delete_by_pattern(&pattern).await?;
        self.publish(Envelope::clear_all(self.name.clone())).await?;
        self.local.invalidate_all();
        Ok(())
    }

    /// Apply an envelope received from the bus to the local tier only
    pub async fn apply_remote_update(&self, envelope: Envelope<K, V>) {
        if envelope.cache_name != self.name {
            tracing::warn!(
                "Cache '{}' ignored an envelope addressed to '{}'",
                self.name,
                envelope.cache_name
            );
            return;
        }

        match envelope.change {
            Change::ClearAll => {
                tracing::debug!("Clearing local cache '{}'", self.name);
                self.local.invalidate_all();
            }
            Change::Evict { key } => {
                tracing::debug!("Evicting local key {:?} from cache '{}'", key, self.name);
                self.local.invalidate(&key).await;
            }
            Change::Refresh { key, value } => {
                tracing::debug!("Refreshing local key {:?} in cache '{}'", key, self.name);
                self.local.put(key, value).await;
            }
        }
    }

    async fn evict_locked(&self, key: &K) -> Result<()> {
        let remote_key = self.remote_key(key)?;
        self.context.remote.delete(&remote_key).await?;
        self.publish(Envelope::evict(self.name.clone(), key.clone()))
            .await?;
        self.local.invalidate(key).await;
        Ok(())
    }

    async fn fetch_remote(&self, key: &K) -> Result<StoreValue<V>> {
        let remote_key = self.remote_key(key)?;
        match self.context.remote.get(&remote_key).await? {
            Some(bytes) => Ok(StoreValue::Value(self.context.codec.decode(&bytes)?)),
            None => Err(Error::NotFound),
        }
    }

    /// Initializer handed to the local tier. It only takes the loader out of
    /// `pending` once the local tier actually runs it.
    async fn load_pending<F, Fut, E>(
        &self,
        key: &K,
        pending: &mut Option<F>,
    ) -> Result<StoreValue<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let loader = pending
            .take()
            .ok_or_else(|| Error::Internal("loader already consumed".to_string()))?;
        self.load(key, loader).await
    }

    async fn load<F, Fut, E>(&self, key: &K, loader: F) -> Result<StoreValue<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let remote_key = self.remote_key(key)?;

        if let Some(bytes) = self.context.remote.get(&remote_key).await? {
            let value = StoreValue::Value(self.context.codec.decode(&bytes)?);
            tracing::debug!("Remote hit for '{}' in cache '{}'", remote_key, self.name);
            // Peers get the value too, even though this was a read
            self.publish(Envelope::refresh(self.name.clone(), key.clone(), value.clone()))
                .await?;
            return Ok(value);
        }

        tracing::debug!("Remote miss for '{}', running loader", remote_key);
        let loaded = loader()
            .await
            .map_err(|e| Error::value_retrieval(format!("{:?}", key), e))?;

        let value = match loaded {
            Some(value) => StoreValue::Value(value),
            None if self.allow_null_values => StoreValue::Null,
            None => return Err(Error::NotFound),
        };

        self.write_remote(&remote_key, &value).await?;
        self.publish(Envelope::refresh(self.name.clone(), key.clone(), value.clone()))
            .await?;
        Ok(value)
    }

    fn to_store_value(&self, value: Option<V>) -> Result<StoreValue<V>> {
        match value {
            Some(value) => Ok(StoreValue::Value(value)),
            None if self.allow_null_values => Ok(StoreValue::Null),
            None => Err(Error::NullValueRejected(self.name.clone())),
        }
    }

    /// Null markers stay in the local tier
    async fn write_remote(&self, remote_key: &str, value: &StoreValue<V>) -> Result<()> {
        let StoreValue::Value(value) = value else {
            return Ok(());
        };

        let ttl = self.expiry.draw(self.context.random.as_ref());
        let payload = self.context.codec.encode(value)?;
        self.context.remote.set(remote_key, payload, ttl).await
    }

    async fn publish(&self, envelope: Envelope<K, V>) -> Result<()> {
        let payload = self.context.codec.encode(&envelope)?;
        tracing::debug!(
            "Publishing {} for cache '{}' on '{}'",
            envelope.kind(),
            self.name,
            self.topic
        );
        self.context.bus.publish(&self.topic, payload).await
    }
}

impl<K, V, C> std::fmt::Debug for CacheEngine<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("expiry", &self.expiry)
            .field("local", &self.local)
            .finish()
    }
}
