// src/core/store/redis.rs

//! Redis-backed [`StateStore`] over a single multiplexed connection.
//!
//! The connection is established once at startup; cloning a
//! `MultiplexedConnection` is cheap and each operation works on its own
//! clone, so the store is safe to share across request handlers.

use crate::core::ProxyError;
use crate::core::store::StateStore;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::info;

pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connects to the given endpoint. Fails fast when the server is
    /// unreachable so the caller can select the fallback store instead.
    pub async fn connect(url: &str) -> Result<Self, ProxyError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to state store at {}", redacted_endpoint(url));
        Ok(Self { conn })
    }
}

/// Strips userinfo from a redis URL before it reaches the logs.
fn redacted_endpoint(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}:{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("?"),
            parsed.port().unwrap_or(6379)
        ),
        Err(_) => "<unparseable redis url>".to_string(),
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn ping(&self) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        match ttl {
            // The remote store's native TTL unit is milliseconds (PX).
            Some(ttl) => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, ProxyError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, ProxyError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn incr(&self, key: &str) -> Result<i64, ProxyError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1i64).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProxyError> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(applied)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, ProxyError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ProxyError> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }
}
