use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Everything the engine needs from a cached value type.
pub trait CacheValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Value as held by the local tier and carried in refresh envelopes.
///
/// `Null` stands in for a loader that produced nothing. It is cached locally
/// when null caching is enabled and is never written to the remote tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreValue<V> {
    Null,
    Value(V),
}

impl<V> StoreValue<V> {
    pub fn is_null(&self) -> bool {
        matches!(self, StoreValue::Null)
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            StoreValue::Null => None,
            StoreValue::Value(v) => Some(v),
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            StoreValue::Null => None,
            StoreValue::Value(v) => Some(v),
        }
    }
}

impl<V> From<V> for StoreValue<V> {
    fn from(value: V) -> Self {
        StoreValue::Value(value)
    }
}
