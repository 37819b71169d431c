//! Two-tier cache: a moka-backed local tier in front of a shared remote store,
//! kept coherent across processes by invalidation envelopes on a shared bus.

pub mod codec;
pub mod domain;
pub mod events;
pub mod jitter;
pub mod key;
pub mod local;
pub mod planes;
pub mod ports;

pub use codec::{Codec, JsonCodec};
pub use domain::{CacheValue, StoreValue};
pub use events::{Addressee, Change, Envelope};
pub use jitter::{ExpiryWindow, RandomSource, SharedRng};
pub use key::{CacheKey, KeyConverters, KeyPart, KeyShape};
pub use planes::control::listener::BusListener;
pub use planes::control::registry::CacheRegistry;
pub use planes::data::engine::{CacheContext, CacheEngine};
pub use ports::{Bus, RemoteStore};
