#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use shared::config::CacheSettings;
use shared::{Error, Result, TtlMs};
use std::sync::Arc;
use std::time::Duration;
use storage_engine::{LocalBus, MemoryRemoteStore};
use strata::ports::{Bus, RemoteStore};
use strata::{BusListener, CacheContext, CacheEngine, CacheRegistry, JsonCodec, SharedRng, StoreValue};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

pub const TOPIC: &str = "cache:multi:topic";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

impl User {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

pub type UserRegistry = CacheRegistry<u64, User>;
pub type UserEngine = CacheEngine<u64, User>;

pub fn settings() -> CacheSettings {
    CacheSettings {
        cache_names: vec!["users".to_string(), "orders".to_string()],
        dynamic: true,
        cache_prefix: Some("app".to_string()),
        ..CacheSettings::default()
    }
}

/// One simulated process: a registry plus its running listener
pub struct Node {
    pub registry: Arc<UserRegistry>,
    pub listener: Option<JoinHandle<()>>,
}

impl Node {
    pub async fn engine(&self, name: &str) -> Arc<UserEngine> {
        self.registry.require(name).await.unwrap()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

pub fn registry(
    settings: CacheSettings,
    remote: Arc<dyn RemoteStore>,
    bus: Arc<dyn Bus>,
) -> Arc<UserRegistry> {
    let context = CacheContext::new(remote, bus).with_random(Arc::new(SharedRng::seeded(42)));
    Arc::new(CacheRegistry::new(settings, context))
}

/// Registry with its configured caches loaded and a listener on the shared topic
pub async fn node(settings: CacheSettings, remote: &MemoryRemoteStore, bus: &LocalBus) -> Node {
    let bus: Arc<dyn Bus> = Arc::new(bus.clone());
    let registry = registry(settings, Arc::new(remote.clone()), bus.clone());
    registry.load_initial().await.unwrap();

    let listener = BusListener::new(registry.clone(), bus, Arc::new(JsonCodec))
        .start()
        .await
        .unwrap();

    Node {
        registry,
        listener: Some(listener),
    }
}

/// Registry without a listener; it publishes but never hears its peers
pub async fn deaf_node(settings: CacheSettings, remote: &MemoryRemoteStore, bus: &LocalBus) -> Node {
    let registry = registry(settings, Arc::new(remote.clone()), Arc::new(bus.clone()));
    registry.load_initial().await.unwrap();
    Node {
        registry,
        listener: None,
    }
}

/// Poll the local tier until `key` holds `expected`, failing after two seconds
pub async fn wait_for_local(
    engine: &Arc<UserEngine>,
    key: u64,
    expected: Option<StoreValue<User>>,
) {
    let reached = timeout(Duration::from_secs(2), async {
        loop {
            if engine.get_local(&key).await == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(
        reached.is_ok(),
        "local entry {} of '{}' never became {:?}",
        key,
        engine.name(),
        expected
    );
}

/// Next payload on a raw subscription, as JSON
pub async fn next_message(
    messages: &mut BoxStream<'static, Bytes>,
) -> Option<serde_json::Value> {
    let payload = timeout(Duration::from_secs(2), messages.next())
        .await
        .ok()??;
    serde_json::from_slice(&payload).ok()
}

/// True if nothing arrives on the subscription for a short while
pub async fn stays_quiet(messages: &mut BoxStream<'static, Bytes>) -> bool {
    timeout(Duration::from_millis(100), messages.next())
        .await
        .is_err()
}

/// Remote store and bus that fail every call
pub struct Unreachable;

fn refused() -> Error {
    Error::remote("connection refused")
}

#[async_trait]
impl RemoteStore for Unreachable {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Err(refused())
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: TtlMs) -> Result<()> {
        Err(refused())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(refused())
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<()> {
        Err(refused())
    }
}

#[async_trait]
impl Bus for Unreachable {
    async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<()> {
        Err(refused())
    }

    async fn subscribe(&self, _topic: &str) -> Result<BoxStream<'static, Bytes>> {
        Err(refused())
    }
}

/// In-memory remote store whose reads take `delay`
pub struct SlowReads {
    pub inner: MemoryRemoteStore,
    pub delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowReads {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: TtlMs) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<()> {
        self.inner.delete_by_pattern(pattern).await
    }
}
