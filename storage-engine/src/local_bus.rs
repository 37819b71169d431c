use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use shared::Result;
use std::sync::Arc;
use strata::ports::Bus;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

const DEFAULT_CAPACITY: usize = 1024;

/// Topic -> broadcast channel bus for a single process
///
/// Every subscriber of a topic receives every payload published after it
/// subscribed, including its own. Slow subscribers that fall behind the
/// channel capacity lose the oldest payloads.
#[derive(Clone)]
pub struct LocalBus {
    topics: Arc<DashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let Some(sender) = self.topics.get(topic).map(|sender| sender.clone()) else {
            tracing::debug!("No subscribers on '{}', message dropped", topic);
            return Ok(());
        };

        if sender.send(payload).is_err() {
            tracing::debug!("No subscribers on '{}', message dropped", topic);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |result| {
            let topic = topic.clone();
            async move {
                match result {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        tracing::warn!("Subscriber on '{}' lagged by {} messages", topic, n);
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("topics", &self.topics.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_every_subscriber_receives_payload() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe("topic").await.unwrap();
        let mut second = bus.subscribe("topic").await.unwrap();
        assert_eq!(bus.subscriber_count("topic"), 2);

        bus.publish("topic", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(first.next().await, Some(Bytes::from_static(b"hello")));
        assert_eq!(second.next().await, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        bus.publish("nobody", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::new();
        let mut users = bus.subscribe("users").await.unwrap();

        bus.publish("orders", Bytes::from_static(b"o")).await.unwrap();
        bus.publish("users", Bytes::from_static(b"u")).await.unwrap();

        assert_eq!(users.next().await, Some(Bytes::from_static(b"u")));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_latest() {
        let bus = LocalBus::with_capacity(2);
        let mut slow = bus.subscribe("topic").await.unwrap();

        for payload in [b"1", b"2", b"3", b"4"] {
            bus.publish("topic", Bytes::copy_from_slice(payload))
                .await
                .unwrap();
        }

        let next = timeout(Duration::from_secs(1), slow.next()).await.unwrap();
        assert_eq!(next, Some(Bytes::from_static(b"3")));
    }
}
