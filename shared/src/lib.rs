// shared/src/lib.rs

use std::sync::Arc;

/// Boxed error accepted from loaders and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared cause; `Error` is cloned to every caller waiting on one load.
pub type SharedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("cache not found: {0}")]
    CacheNotFound(String),
    #[error("value for key {key} could not be loaded: {source}")]
    ValueRetrieval {
        key: String,
        #[source]
        source: SharedCause,
    },
    #[error("remote: {0}")]
    Remote(#[source] SharedCause),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(
        "cannot convert cache key of type {type_name} to a string; register a key converter or give it a string form"
    )]
    KeyConversion { type_name: String },
    #[error("codec: {0}")]
    Codec(String),
    #[error("cache '{0}' does not allow null values")]
    NullValueRejected(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a failure reported by the remote store or the bus.
    pub fn remote(err: impl Into<BoxError>) -> Self {
        Error::Remote(Arc::from(err.into()))
    }

    pub fn value_retrieval(key: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Error::ValueRetrieval {
            key: key.into(),
            source: Arc::from(err.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TtlMs(pub u64);

impl TtlMs {
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

pub mod config;
