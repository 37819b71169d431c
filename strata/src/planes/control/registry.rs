use crate::codec::{Codec, JsonCodec};
use crate::domain::CacheValue;
use crate::events::Envelope;
use crate::key::CacheKey;
use crate::planes::data::engine::{CacheContext, CacheEngine};
use shared::config::CacheSettings;
use shared::{Error, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name -> engine registry; one per process per (K, V) pair
///
/// Engines are created from the shared settings and context, either eagerly
/// through `load_initial` or on first access when the registry is dynamic.
pub struct CacheRegistry<K, V, C = JsonCodec>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    caches: RwLock<HashMap<String, Arc<CacheEngine<K, V, C>>>>,
    settings: CacheSettings,
    context: CacheContext<C>,
}

impl<K, V, C> CacheRegistry<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    pub fn new(settings: CacheSettings, context: CacheContext<C>) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            settings,
            context,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Topic every engine of this registry publishes on
    pub fn topic(&self) -> &str {
        &self.settings.remote.topic
    }

    /// Create an engine for every configured cache name
    pub async fn load_initial(&self) -> Result<Vec<Arc<CacheEngine<K, V, C>>>> {
        let mut caches = self.caches.write().await;
        let mut engines = Vec::with_capacity(self.settings.cache_names.len());

        for name in &self.settings.cache_names {
            let engine = match caches.get(name) {
                Some(engine) => engine.clone(),
                None => {
                    let engine = Arc::new(self.build(name)?);
                    caches.insert(name.clone(), engine.clone());
                    engine
                }
            };
            engines.push(engine);
        }

        tracing::info!("Loaded {} configured caches", engines.len());
        Ok(engines)
    }

    /// Existing engine, or a new one when the registry is dynamic
    pub async fn get(&self, name: &str) -> Result<Option<Arc<CacheEngine<K, V, C>>>> {
        if let Some(engine) = self.caches.read().await.get(name) {
            return Ok(Some(engine.clone()));
        }

        if !self.settings.dynamic {
            return Ok(None);
        }

        let mut caches = self.caches.write().await;
        // Another caller may have created it between the two locks
        if let Some(engine) = caches.get(name) {
            return Ok(Some(engine.clone()));
        }

        let engine = Arc::new(self.build(name)?);
        caches.insert(name.to_string(), engine.clone());
        Ok(Some(engine))
    }

    /// Like `get`, but a missing cache is an error
    pub async fn require(&self, name: &str) -> Result<Arc<CacheEngine<K, V, C>>> {
        self.get(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))
    }

    /// Whether an engine for `name` exists; never creates one
    pub async fn contains(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Names of the engines created so far, sorted
    pub async fn cache_names(&self) -> Vec<String> {
        let caches = self.caches.read().await;
        let mut names: Vec<String> = caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Hand an inbound envelope to the engine it names.
    ///
    /// Envelopes for caches this registry has not created are dropped; no
    /// engine is created here even when the registry is dynamic.
    pub async fn dispatch(&self, envelope: Envelope<K, V>) -> bool {
        let engine = self.caches.read().await.get(&envelope.cache_name).cloned();

        match engine {
            Some(engine) => {
                engine.apply_remote_update(envelope).await;
                true
            }
            None => {
                tracing::debug!(
                    "Dropping {} envelope for unknown cache '{}'",
                    envelope.kind(),
                    envelope.cache_name
                );
                false
            }
        }
    }

    fn build(&self, name: &str) -> Result<CacheEngine<K, V, C>> {
        let engine = CacheEngine::new(name, &self.settings, self.context.clone())?;
        tracing::debug!(
            "Created cache '{}' with remote prefix '{}'",
            name,
            engine.key_prefix()
        );
        Ok(engine)
    }
}

impl<K, V, C> Debug for CacheRegistry<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &"<RwLock<HashMap>>")
            .field("dynamic", &self.settings.dynamic)
            .field("topic", &self.settings.remote.topic)
            .finish()
    }
}
