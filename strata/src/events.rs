use crate::domain::StoreValue;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Invalidation message published on the shared topic.
///
/// On the wire this is `{cacheName, key?, value?}`; which fields are present
/// decides the change. A value without a key is rejected while decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<K, V> {
    pub cache_name: String,
    pub change: Change<K, V>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change<K, V> {
    /// Drop every local entry of the cache.
    ClearAll,
    /// Drop one local entry.
    Evict { key: K },
    /// Upsert one local entry; never written back to the remote tier.
    Refresh { key: K, value: StoreValue<V> },
}

impl<K, V> Envelope<K, V> {
    pub fn clear_all(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            change: Change::ClearAll,
        }
    }

    pub fn evict(cache_name: impl Into<String>, key: K) -> Self {
        Self {
            cache_name: cache_name.into(),
            change: Change::Evict { key },
        }
    }

    pub fn refresh(cache_name: impl Into<String>, key: K, value: StoreValue<V>) -> Self {
        Self {
            cache_name: cache_name.into(),
            change: Change::Refresh { key, value },
        }
    }

    pub fn key(&self) -> Option<&K> {
        match &self.change {
            Change::ClearAll => None,
            Change::Evict { key } | Change::Refresh { key, .. } => Some(key),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.change {
            Change::ClearAll => "clear_all",
            Change::Evict { .. } => "evict",
            Change::Refresh { .. } => "refresh",
        }
    }
}

/// Only the cache name of an envelope, decodable whatever its key and value types.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addressee {
    pub cache_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a, K, V> {
    cache_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a K>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a StoreValue<V>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<K, V> {
    cache_name: String,
    key: Option<K>,
    value: Option<StoreValue<V>>,
}

impl<K: Serialize, V: Serialize> Serialize for Envelope<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (key, value) = match &self.change {
            Change::ClearAll => (None, None),
            Change::Evict { key } => (Some(key), None),
            Change::Refresh { key, value } => (Some(key), Some(value)),
        };
        WireEnvelopeRef {
            cache_name: &self.cache_name,
            key,
            value,
        }
        .serialize(serializer)
    }
}

impl<'de, K: DeserializeOwned, V: DeserializeOwned> Deserialize<'de> for Envelope<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::<K, V>::deserialize(deserializer)?;
        let change = match (wire.key, wire.value) {
            (None, None) => Change::ClearAll,
            (Some(key), None) => Change::Evict { key },
            (Some(key), Some(value)) => Change::Refresh { key, value },
            (None, Some(_)) => {
                return Err(de::Error::custom(format!(
                    "envelope for cache '{}' carries a value without a key",
                    wire.cache_name
                )));
            }
        };
        Ok(Envelope {
            cache_name: wire.cache_name,
            change,
        })
    }
}
