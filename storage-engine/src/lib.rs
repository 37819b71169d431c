//! In-process backends for the strata ports: a TTL-aware remote store and a
//! broadcast bus. Several registries in one process can share them to behave
//! like separate nodes talking to one Redis.

mod glob;
pub mod local_bus;
pub mod memory_remote;

pub use local_bus::LocalBus;
pub use memory_remote::MemoryRemoteStore;
