//! Infrastructure layer: log store, cache store, producer, consumer worker,
//! and configuration.

pub mod cache;
pub mod config;
pub mod cursor;
pub mod log_store;
pub mod producer;
pub mod synchronizer;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use cache::{CacheError, CacheStore, InMemoryCacheStore, RedisCacheStore};
pub use config::{Config, ConfigError};
pub use cursor::{CursorError, CursorStore, InMemoryCursorStore, RedisCursorStore};
pub use log_store::{EventLog, InMemoryEventLog, LogError, RedisEventLog};
pub use producer::{Producer, ProducerHandle};
pub use synchronizer::{CacheSynchronizer, SyncError};
pub use workers::{Consumer, ConsumerHandle, ConsumerOptions};
