//! Redis-backed cache store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{CacheError, CacheStore};

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Transport(e.to_string())
    }
}

/// Redis cache with an optional read replica.
///
/// Writes (SET/DEL) always go to the master; reads go to the replica when
/// one is configured, otherwise to the master.
#[derive(Clone)]
pub struct RedisCacheStore {
    writer: ConnectionManager,
    reader: ConnectionManager,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore").finish_non_exhaustive()
    }
}

impl RedisCacheStore {
    /// Connect to the master and, when given, a read replica.
    pub async fn connect(master_url: &str, replica_url: Option<&str>) -> Result<Self, CacheError> {
        let writer = redis::Client::open(master_url)?
            .get_connection_manager()
            .await?;

        let reader = match replica_url {
            Some(url) => redis::Client::open(url)?.get_connection_manager().await?,
            None => writer.clone(),
        };

        Ok(Self { writer, reader })
    }

    pub fn new(writer: ConnectionManager, reader: ConnectionManager) -> Self {
        Self { writer, reader }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.writer.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.reader.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.writer.clone();
        // DEL returns the number of removed keys; zero (absent key) is fine.
        let _removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
