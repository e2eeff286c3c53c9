//! Cache sync worker: consumes the product stream and keeps the read cache
//! fresh.
//!
//! All clients are built here and injected explicitly; the process owns one
//! consumer loop and shuts it down cooperatively on SIGINT.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use shopsync_events::Dispatcher;
use shopsync_infra::{
    CacheSynchronizer, Config, Consumer, CursorStore, InMemoryCursorStore, RedisCacheStore,
    RedisCursorStore, RedisEventLog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopsync_observability::init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(stream = %config.stream, persist_cursor = config.persist_cursor, "starting cache sync worker");

    let log = RedisEventLog::connect(&config.redis_master_url)
        .await
        .context("failed to connect to the log store")?;
    let cache = RedisCacheStore::connect(
        &config.redis_master_url,
        config.redis_replica_url.as_deref(),
    )
    .await
    .context("failed to connect to the cache store")?;

    let cursors: Arc<dyn CursorStore> = if config.persist_cursor {
        Arc::new(
            RedisCursorStore::connect(&config.redis_master_url)
                .await
                .context("failed to connect to the cursor store")?,
        )
    } else {
        Arc::new(InMemoryCursorStore::new())
    };

    let synchronizer =
        CacheSynchronizer::new(cache).with_key_prefix(config.cache_key_prefix.clone());
    let handle = Consumer::new(
        log,
        Dispatcher::new(synchronizer),
        cursors,
        config.stream.clone(),
    )
    .with_options(config.consumer.clone())
    .spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("shutdown signal received");

    handle.shutdown().await;
    info!("cache sync worker stopped");
    Ok(())
}
