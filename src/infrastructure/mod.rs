//! Adapters for the domain ports.

pub mod clock;
pub mod in_memory;
pub mod lease_lock;
#[cfg(feature = "lock-redis")]
pub mod redis_lock;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
