//! Read-optimized key/value cache boundary.
//!
//! Plain key/value, no transactions: the consumer loop's strict ordering
//! makes unconditional overwrites safe.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod in_memory;
pub mod redis;

pub use self::in_memory::InMemoryCacheStore;
pub use self::redis::RedisCacheStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache transport error: {0}")]
    Transport(String),
}

/// Key/value cache store.
///
/// `delete` of an absent key is a successful no-op.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> CacheStore for Arc<C>
where
    C: CacheStore + ?Sized,
{
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}
