#![deny(clippy::all)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use shared::{Result, TtlMs};

// Ports are the pluggable extension points for the shared tier and the transport

/// Port for the shared, cross-node store (e.g. Redis)
///
/// Implementations report every failure as `Error::Remote`; the engine passes
/// those errors through to its callers untouched.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: TtlMs) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Delete every key matching a glob pattern where `*` matches any run of characters.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<()>;
}

/// Port for the publish/subscribe transport carrying invalidation envelopes
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Fire-and-forget publish; no delivery acknowledgement is awaited.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
    /// Subscribe to a topic. The subscription is live once this returns.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>>;
}
