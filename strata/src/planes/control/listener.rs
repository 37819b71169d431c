use crate::codec::Codec;
use crate::domain::CacheValue;
use crate::events::{Addressee, Envelope};
use crate::key::CacheKey;
use crate::planes::control::registry::CacheRegistry;
use crate::ports::Bus;
use futures::StreamExt;
use shared::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Feeds envelopes from the shared topic into a registry
pub struct BusListener<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    registry: Arc<CacheRegistry<K, V, C>>,
    bus: Arc<dyn Bus>,
    codec: Arc<C>,
}

impl<K, V, C> BusListener<K, V, C>
where
    K: CacheKey,
    V: CacheValue,
    C: Codec,
{
    pub fn new(registry: Arc<CacheRegistry<K, V, C>>, bus: Arc<dyn Bus>, codec: Arc<C>) -> Self {
        Self {
            registry,
            bus,
            codec,
        }
    }

    /// Subscribe to the registry's topic and spawn the receive loop.
    ///
    /// The subscription exists once this returns. The task ends when the bus
    /// closes the stream.
    pub async fn start(self) -> Result<JoinHandle<()>> {
        let topic = self.registry.topic().to_string();
        let mut messages = self.bus.subscribe(&topic).await?;
        tracing::info!("Listening for cache invalidations on '{}'", topic);

        Ok(tokio::spawn(async move {
            while let Some(payload) = messages.next().await {
                self.on_message(&payload).await;
            }
            tracing::info!("Invalidation stream on '{}' closed", topic);
        }))
    }

    /// Decode one payload and dispatch it; undecodable payloads are dropped.
    ///
    /// Registries with other key and value types share the topic, so the
    /// cache name is read first and only envelopes for caches held here are
    /// decoded in full.
    pub async fn on_message(&self, payload: &[u8]) -> bool {
        let addressee = match self.codec.decode::<Addressee>(payload) {
            Ok(addressee) => addressee,
            Err(e) => {
                tracing::warn!("Dropping undecodable invalidation message: {}", e);
                return false;
            }
        };

        if !self.registry.contains(&addressee.cache_name).await {
            tracing::debug!(
                "Ignoring invalidation for cache '{}', not held here",
                addressee.cache_name
            );
            return false;
        }

        match self.codec.decode::<Envelope<K, V>>(payload) {
            Ok(envelope) => self.registry.dispatch(envelope).await,
            Err(e) => {
                tracing::warn!(
                    "Dropping malformed invalidation for cache '{}': {}",
                    addressee.cache_name,
                    e
                );
                false
            }
        }
    }
}
