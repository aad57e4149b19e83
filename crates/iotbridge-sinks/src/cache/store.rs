//! Key/value cache interface and the in-memory backend.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use iotbridge_core::config::RedisSection;
use iotbridge_core::SharedClock;

use crate::error::{CacheError, CacheResult};

/// Logical database a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Gate online state
    Status,
    /// Device descriptors
    Config,
    /// Gate child lists and `PARENT_<device>` links
    Relation,
    /// Per-device hash of the latest data arrays
    Realtime,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 4] = [
        CacheNamespace::Status,
        CacheNamespace::Config,
        CacheNamespace::Relation,
        CacheNamespace::Realtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Status => "status",
            CacheNamespace::Config => "config",
            CacheNamespace::Relation => "relation",
            CacheNamespace::Realtime => "realtime",
        }
    }

    /// Database index configured for this namespace.
    pub fn database(&self, section: &RedisSection) -> u32 {
        match self {
            CacheNamespace::Status => section.status_db,
            CacheNamespace::Config => section.config_db,
            CacheNamespace::Relation => section.relation_db,
            CacheNamespace::Realtime => section.realtime_db,
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the bridges need from a key/value cache.
///
/// Semantics follow Redis: `set` clears any expiry, `expire` on a missing
/// key is a no-op, `ttl` is `None` for missing keys and keys without expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, ns: CacheNamespace, key: &str, value: &str) -> CacheResult<()>;

    async fn hset(&self, ns: CacheNamespace, key: &str, field: &str, value: &str)
        -> CacheResult<()>;

    async fn hgetall(&self, ns: CacheNamespace, key: &str) -> CacheResult<HashMap<String, String>>;

    /// First `limit` items of a list.
    async fn list_range(&self, ns: CacheNamespace, key: &str, limit: usize)
        -> CacheResult<Vec<String>>;

    /// Replace a list with `items`, in order. An empty slice deletes it.
    async fn replace_list(&self, ns: CacheNamespace, key: &str, items: &[String])
        -> CacheResult<()>;

    async fn keys(&self, ns: CacheNamespace) -> CacheResult<Vec<String>>;

    async fn expire(&self, ns: CacheNamespace, key: &str, ttl: Duration) -> CacheResult<()>;

    async fn persist(&self, ns: CacheNamespace, key: &str) -> CacheResult<()>;

    async fn ttl(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<Duration>>;
}

#[derive(Debug, Clone)]
enum Entry {
    String(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::String(_) => "string",
            Entry::Hash(_) => "hash",
            Entry::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    /// Absolute expiry, in clock seconds.
    expires_at: Option<f64>,
}

type SlotKey = (CacheNamespace, String);

/// In-process cache with clock-driven expiry.
pub struct MemoryCacheStore {
    slots: DashMap<SlotKey, Slot>,
    clock: SharedClock,
}

impl MemoryCacheStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot_key(ns: CacheNamespace, key: &str) -> SlotKey {
        (ns, key.to_string())
    }

    /// Drop the slot if it has expired; returns whether it is still live.
    fn live(&self, slot_key: &SlotKey) -> bool {
        let now = self.clock.now_secs();
        let expired = match self.slots.get(slot_key) {
            Some(slot) => matches!(slot.expires_at, Some(at) if at <= now),
            None => return false,
        };
        if expired {
            self.slots.remove(slot_key);
        }
        !expired
    }

    fn wrong_type(ns: CacheNamespace, key: &str, found: &Entry, wanted: &str) -> CacheError {
        CacheError::InvalidValue {
            key: format!("{}:{}", ns, key),
            reason: format!("holds a {}, expected a {}", found.kind(), wanted),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<String>> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(None);
        }
        match self.slots.get(&slot_key).map(|slot| slot.entry.clone()) {
            Some(Entry::String(value)) => Ok(Some(value)),
            Some(other) => Err(Self::wrong_type(ns, key, &other, "string")),
            None => Ok(None),
        }
    }

    async fn set(&self, ns: CacheNamespace, key: &str, value: &str) -> CacheResult<()> {
        self.slots.insert(
            Self::slot_key(ns, key),
            Slot {
                entry: Entry::String(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn hset(
        &self,
        ns: CacheNamespace,
        key: &str,
        field: &str,
        value: &str,
    ) -> CacheResult<()> {
        let slot_key = Self::slot_key(ns, key);
        self.live(&slot_key);
        let mut slot = self.slots.entry(slot_key).or_insert_with(|| Slot {
            entry: Entry::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.entry {
            Entry::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
                Ok(())
            }
            other => Err(Self::wrong_type(ns, key, other, "hash")),
        }
    }

    async fn hgetall(&self, ns: CacheNamespace, key: &str) -> CacheResult<HashMap<String, String>> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(HashMap::new());
        }
        match self.slots.get(&slot_key).map(|slot| slot.entry.clone()) {
            Some(Entry::Hash(map)) => Ok(map),
            Some(other) => Err(Self::wrong_type(ns, key, &other, "hash")),
            None => Ok(HashMap::new()),
        }
    }

    async fn list_range(
        &self,
        ns: CacheNamespace,
        key: &str,
        limit: usize,
    ) -> CacheResult<Vec<String>> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(Vec::new());
        }
        match self.slots.get(&slot_key).map(|slot| slot.entry.clone()) {
            Some(Entry::List(items)) => Ok(items.into_iter().take(limit).collect()),
            Some(other) => Err(Self::wrong_type(ns, key, &other, "list")),
            None => Ok(Vec::new()),
        }
    }

    async fn replace_list(
        &self,
        ns: CacheNamespace,
        key: &str,
        items: &[String],
    ) -> CacheResult<()> {
        let slot_key = Self::slot_key(ns, key);
        if items.is_empty() {
            self.slots.remove(&slot_key);
        } else {
            self.slots.insert(
                slot_key,
                Slot {
                    entry: Entry::List(items.to_vec()),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn keys(&self, ns: CacheNamespace) -> CacheResult<Vec<String>> {
        let now = self.clock.now_secs();
        self.slots
            .retain(|_, slot| !matches!(slot.expires_at, Some(at) if at <= now));
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|item| item.key().0 == ns)
            .map(|item| item.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn expire(&self, ns: CacheNamespace, key: &str, ttl: Duration) -> CacheResult<()> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(());
        }
        let at = self.clock.now_secs() + ttl.as_secs_f64();
        if let Some(mut slot) = self.slots.get_mut(&slot_key) {
            slot.expires_at = Some(at);
        }
        Ok(())
    }

    async fn persist(&self, ns: CacheNamespace, key: &str) -> CacheResult<()> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(());
        }
        if let Some(mut slot) = self.slots.get_mut(&slot_key) {
            slot.expires_at = None;
        }
        Ok(())
    }

    async fn ttl(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<Duration>> {
        let slot_key = Self::slot_key(ns, key);
        if !self.live(&slot_key) {
            return Ok(None);
        }
        let now = self.clock.now_secs();
        Ok(self
            .slots
            .get(&slot_key)
            .and_then(|slot| slot.expires_at)
            .map(|at| Duration::from_secs_f64((at - now).max(0.0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotbridge_core::ManualClock;
    use std::sync::Arc;

    fn store() -> (MemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(100.0));
        (MemoryCacheStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let (store, clock) = store();
        store.set(CacheNamespace::Status, "g1", "OFFLINE").await.unwrap();
        store
            .expire(CacheNamespace::Status, "g1", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.ttl(CacheNamespace::Status, "g1").await.unwrap(),
            Some(Duration::from_secs(10))
        );

        clock.advance(9.0);
        assert!(store.get(CacheNamespace::Status, "g1").await.unwrap().is_some());
        clock.advance(1.0);
        assert!(store.get(CacheNamespace::Status, "g1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_and_persist_clear_expiry() {
        let (store, _clock) = store();
        store.hset(CacheNamespace::Realtime, "d1", "a/value", "[1,2,0]").await.unwrap();
        store
            .expire(CacheNamespace::Realtime, "d1", Duration::from_secs(5))
            .await
            .unwrap();
        store.persist(CacheNamespace::Realtime, "d1").await.unwrap();
        assert_eq!(store.ttl(CacheNamespace::Realtime, "d1").await.unwrap(), None);

        store.set(CacheNamespace::Config, "d1", "{}").await.unwrap();
        store
            .expire(CacheNamespace::Config, "d1", Duration::from_secs(5))
            .await
            .unwrap();
        store.set(CacheNamespace::Config, "d1", "{}").await.unwrap();
        assert_eq!(store.ttl(CacheNamespace::Config, "d1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let (store, _clock) = store();
        store.set(CacheNamespace::Config, "d1", "cfg").await.unwrap();
        assert!(store.get(CacheNamespace::Status, "d1").await.unwrap().is_none());
        assert_eq!(store.keys(CacheNamespace::Config).await.unwrap(), vec!["d1"]);
        assert!(store.keys(CacheNamespace::Relation).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (store, _clock) = store();
        store.set(CacheNamespace::Relation, "g1", "x").await.unwrap();
        let err = store
            .list_range(CacheNamespace::Relation, "g1", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_list_range_limit() {
        let (store, _clock) = store();
        let items: Vec<String> = (0..5).map(|i| format!("d{}", i)).collect();
        store
            .replace_list(CacheNamespace::Relation, "g1", &items)
            .await
            .unwrap();
        assert_eq!(
            store.list_range(CacheNamespace::Relation, "g1", 3).await.unwrap(),
            vec!["d0", "d1", "d2"]
        );
    }
}
