//! Redis backend: one multiplexed connection per namespace database.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use iotbridge_core::config::RedisSection;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::store::{CacheNamespace, CacheStore};
use crate::error::{CacheError, CacheResult};

pub struct RedisCacheStore {
    status: MultiplexedConnection,
    config: MultiplexedConnection,
    relation: MultiplexedConnection,
    realtime: MultiplexedConnection,
}

impl RedisCacheStore {
    /// Open and ping a connection for each namespace database.
    pub async fn connect(section: &RedisSection) -> CacheResult<Self> {
        let status = open(section, CacheNamespace::Status).await?;
        let config = open(section, CacheNamespace::Config).await?;
        let relation = open(section, CacheNamespace::Relation).await?;
        let realtime = open(section, CacheNamespace::Realtime).await?;
        info!(url = %section.url, "Connected to Redis");
        Ok(Self {
            status,
            config,
            relation,
            realtime,
        })
    }

    /// Connection handles are cheap clones sharing one socket.
    fn conn(&self, ns: CacheNamespace) -> MultiplexedConnection {
        match ns {
            CacheNamespace::Status => self.status.clone(),
            CacheNamespace::Config => self.config.clone(),
            CacheNamespace::Relation => self.relation.clone(),
            CacheNamespace::Realtime => self.realtime.clone(),
        }
    }
}

async fn open(section: &RedisSection, ns: CacheNamespace) -> CacheResult<MultiplexedConnection> {
    let url = section.database_url(ns.database(section));
    let client = redis::Client::open(url.as_str())
        .map_err(|e| CacheError::Connection(format!("{} ({}): {}", ns, url, e)))?;
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| CacheError::Connection(format!("{} ({}): {}", ns, url, e)))?;
    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await?;
    Ok(conn)
}

fn ttl_from_reply(reply: i64) -> Option<Duration> {
    // -2: missing key, -1: no expiry.
    u64::try_from(reply).ok().map(Duration::from_secs)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<String>> {
        Ok(self.conn(ns).get(key).await?)
    }

    async fn set(&self, ns: CacheNamespace, key: &str, value: &str) -> CacheResult<()> {
        self.conn(ns).set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn hset(
        &self,
        ns: CacheNamespace,
        key: &str,
        field: &str,
        value: &str,
    ) -> CacheResult<()> {
        self.conn(ns).hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, ns: CacheNamespace, key: &str) -> CacheResult<HashMap<String, String>> {
        Ok(self.conn(ns).hgetall(key).await?)
    }

    async fn list_range(
        &self,
        ns: CacheNamespace,
        key: &str,
        limit: usize,
    ) -> CacheResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        Ok(self.conn(ns).lrange(key, 0, stop).await?)
    }

    async fn replace_list(
        &self,
        ns: CacheNamespace,
        key: &str,
        items: &[String],
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !items.is_empty() {
            pipe.rpush(key, items).ignore();
        }
        pipe.query_async::<_, ()>(&mut self.conn(ns)).await?;
        Ok(())
    }

    async fn keys(&self, ns: CacheNamespace) -> CacheResult<Vec<String>> {
        let mut keys: Vec<String> = self.conn(ns).keys("*").await?;
        keys.sort();
        Ok(keys)
    }

    async fn expire(&self, ns: CacheNamespace, key: &str, ttl: Duration) -> CacheResult<()> {
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.conn(ns).expire::<_, ()>(key, secs).await?;
        Ok(())
    }

    async fn persist(&self, ns: CacheNamespace, key: &str) -> CacheResult<()> {
        self.conn(ns).persist::<_, ()>(key).await?;
        Ok(())
    }

    async fn ttl(&self, ns: CacheNamespace, key: &str) -> CacheResult<Option<Duration>> {
        let reply: i64 = self.conn(ns).ttl(key).await?;
        Ok(ttl_from_reply(reply))
    }
}
