//! The per-connection backend capability.
//!
//! The cluster only orchestrates connections; the wire protocol lives behind
//! [`CacheConnection`]. Production uses [`RedisConnectionFactory`]; tests plug
//! in an in-process mock.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::config::NodeAddress;
use crate::error::Result;

/// One established connection to a backend node.
///
/// Implementations must be cheap to share: connections are handed out by
/// pool index to concurrent operations, never checked out exclusively.
#[async_trait]
pub trait CacheConnection: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SETEX semantics: store `value` under `key` with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic post-increment; an absent key starts at 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Returns whether the key existed and the TTL was applied.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    async fn ping(&self) -> Result<()>;

    /// Best-effort close. The default is a no-op for transports that tear
    /// down on drop.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens connections to a node. One factory serves every node in the cluster.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: CacheConnection;

    async fn connect(&self, addr: &NodeAddress) -> Result<Self::Conn>;
}

/// Redis-backed connection over a multiplexed async connection.
///
/// The multiplexed connection is internally clonable, so `&self` methods
/// clone a handle per command.
pub struct RedisConnection {
    inner: MultiplexedConnection,
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.inner.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.inner.clone();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.inner.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.inner.clone();
        let found: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.inner.clone();
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.inner.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(applied > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.inner.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Factory for [`RedisConnection`]s, carrying the shared cluster password.
#[derive(Debug, Clone, Default)]
pub struct RedisConnectionFactory {
    password: Option<String>,
}

impl RedisConnectionFactory {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }

    fn url(&self, addr: &NodeAddress) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, addr.host, addr.port),
            None => format!("redis://{}:{}/", addr.host, addr.port),
        }
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    type Conn = RedisConnection;

    async fn connect(&self, addr: &NodeAddress) -> Result<Self::Conn> {
        let client = redis::Client::open(self.url(addr))?;
        let inner = client.get_multiplexed_async_connection().await?;
        Ok(RedisConnection { inner })
    }
}
