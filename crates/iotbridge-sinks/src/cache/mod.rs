//! Key/value cache: Redis namespaces and an in-memory stand-in.

pub mod bridge;
pub mod redis_store;
pub mod store;

pub use self::bridge::{parent_key, CacheBridge, MAX_CHILDREN};
pub use self::redis_store::RedisCacheStore;
pub use self::store::{CacheNamespace, CacheStore, MemoryCacheStore};
