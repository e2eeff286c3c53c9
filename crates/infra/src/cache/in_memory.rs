//! In-memory cache store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CacheError, CacheStore};

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<HashMap<String, String>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the whole cache, for test assertions.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().map(|map| map.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CacheError::Transport("lock poisoned".into()))?;
        map.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let map = self
            .inner
            .read()
            .map_err(|_| CacheError::Transport("lock poisoned".into()))?;
        Ok(map.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CacheError::Transport("lock poisoned".into()))?;
        map.remove(key);
        Ok(())
    }
}
