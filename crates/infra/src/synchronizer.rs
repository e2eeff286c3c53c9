//! Cache synchronizer: materializes product events into the cache.
//!
//! Create and Update are the same operation here: an unconditional
//! write-through overwrite of the key derived from the product id. Log
//! order is the sole ordering authority and the consumer applies entries
//! strictly in ascending id order, so overwrite-by-arrival-order stays
//! correct under at-least-once redelivery: reapplying an event yields the
//! state it already produced.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use shopsync_core::ProductId;
use shopsync_events::ProductEventHandler;

use crate::cache::{CacheError, CacheStore};

/// Default cache key namespace: entries live under `entity:<product_id>`.
pub const DEFAULT_KEY_PREFIX: &str = "entity";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Idempotent Create/Update/Delete handlers over a [`CacheStore`].
#[derive(Debug)]
pub struct CacheSynchronizer<C> {
    cache: C,
    key_prefix: String,
}

impl<C> CacheSynchronizer<C>
where
    C: CacheStore,
{
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Cache key for a product: `<prefix>:<product_id>`.
    pub fn cache_key(&self, product_id: &ProductId) -> String {
        format!("{}:{}", self.key_prefix, product_id)
    }

    async fn overwrite(&self, product_id: &ProductId, snapshot: &JsonValue) -> Result<(), SyncError> {
        let value =
            serde_json::to_string(snapshot).map_err(|e| SyncError::Serialize(e.to_string()))?;
        let key = self.cache_key(product_id);
        self.cache.set(&key, &value).await?;
        debug!(key = %key, "cache entry written");
        Ok(())
    }
}

#[async_trait]
impl<C> ProductEventHandler for CacheSynchronizer<C>
where
    C: CacheStore,
{
    type Error = SyncError;

    async fn on_create(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        self.overwrite(product_id, snapshot).await
    }

    async fn on_update(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        self.overwrite(product_id, snapshot).await
    }

    async fn on_delete(&self, product_id: &ProductId) -> Result<(), Self::Error> {
        let key = self.cache_key(product_id);
        self.cache.delete(&key).await?;
        debug!(key = %key, "cache entry removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use serde_json::json;
    use std::sync::Arc;

    fn synchronizer() -> CacheSynchronizer<Arc<InMemoryCacheStore>> {
        CacheSynchronizer::new(Arc::new(InMemoryCacheStore::new()))
    }

    fn product(id: &str) -> ProductId {
        ProductId::new(id).unwrap()
    }

    #[tokio::test]
    async fn create_writes_the_snapshot_under_the_entity_key() {
        let sync = synchronizer();
        sync.on_create(&product("42"), &json!({"name": "Widget"}))
            .await
            .unwrap();

        let value = sync.cache().get("entity:42").await.unwrap().unwrap();
        assert_eq!(value, r#"{"name":"Widget"}"#);
    }

    #[tokio::test]
    async fn update_overwrites_unconditionally() {
        let sync = synchronizer();
        sync.on_create(&product("42"), &json!({"name": "Widget"}))
            .await
            .unwrap();
        sync.on_update(&product("42"), &json!({"name": "Widget Pro"}))
            .await
            .unwrap();

        let value = sync.cache().get("entity:42").await.unwrap().unwrap();
        assert_eq!(value, r#"{"name":"Widget Pro"}"#);
    }

    #[tokio::test]
    async fn update_without_prior_create_still_writes() {
        // Redelivery can surface an Update before its Create was ever
        // applied to this cache; the overwrite must not care.
        let sync = synchronizer();
        sync.on_update(&product("7"), &json!({"name": "Orphan"}))
            .await
            .unwrap();
        assert!(sync.cache().get("entity:7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_the_key_and_tolerates_absence() {
        let sync = synchronizer();
        sync.on_create(&product("42"), &json!({"name": "Widget"}))
            .await
            .unwrap();
        sync.on_delete(&product("42")).await.unwrap();
        assert!(sync.cache().get("entity:42").await.unwrap().is_none());

        // Deleting again (absent key) is still success.
        sync.on_delete(&product("42")).await.unwrap();
    }

    #[tokio::test]
    async fn reapplying_an_event_is_idempotent() {
        let sync = synchronizer();
        let snapshot = json!({"name": "Widget", "price": 42});

        sync.on_create(&product("42"), &snapshot).await.unwrap();
        let first = sync.cache().get("entity:42").await.unwrap();
        sync.on_create(&product("42"), &snapshot).await.unwrap();
        let second = sync.cache().get("entity:42").await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn key_prefix_is_configurable() {
        let sync = synchronizer().with_key_prefix("product");
        sync.on_create(&product("42"), &json!({})).await.unwrap();
        assert!(sync.cache().get("product:42").await.unwrap().is_some());
    }
}
