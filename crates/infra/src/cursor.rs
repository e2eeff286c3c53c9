//! Consumer cursor persistence.
//!
//! The cursor is the last log id fully processed by the single consumer.
//! Persistence is optional: with the in-memory store, every cold start
//! replays the stream from the beginning, which is safe (apply is
//! idempotent) but can be expensive on long streams. The Redis store makes
//! restarts resume where the previous run stopped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;

use shopsync_core::EntryId;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor transport error: {0}")]
    Transport(String),

    #[error("invalid persisted cursor: {0}")]
    Invalid(String),
}

/// Per-stream cursor store.
///
/// Save failures are never fatal to the consumer: a stale cursor only
/// causes extra replay, which idempotent apply absorbs.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, stream: &str) -> Result<Option<EntryId>, CursorError>;
    async fn save(&self, stream: &str, cursor: EntryId) -> Result<(), CursorError>;
}

#[async_trait]
impl<S> CursorStore for Arc<S>
where
    S: CursorStore + ?Sized,
{
    async fn load(&self, stream: &str) -> Result<Option<EntryId>, CursorError> {
        (**self).load(stream).await
    }

    async fn save(&self, stream: &str, cursor: EntryId) -> Result<(), CursorError> {
        (**self).save(stream, cursor).await
    }
}

/// Process-local cursor store: survives loop restarts within a process,
/// not process restarts.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    inner: RwLock<HashMap<String, EntryId>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, stream: &str) -> Result<Option<EntryId>, CursorError> {
        let map = self
            .inner
            .read()
            .map_err(|_| CursorError::Transport("lock poisoned".into()))?;
        Ok(map.get(stream).copied())
    }

    async fn save(&self, stream: &str, cursor: EntryId) -> Result<(), CursorError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CursorError::Transport("lock poisoned".into()))?;
        map.insert(stream.to_owned(), cursor);
        Ok(())
    }
}

/// Redis-persisted cursor store, keyed `sync:cursor:<stream>`.
#[derive(Clone)]
pub struct RedisCursorStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCursorStore").finish_non_exhaustive()
    }
}

const CURSOR_KEY_PREFIX: &str = "sync:cursor";

impl RedisCursorStore {
    pub async fn connect(url: &str) -> Result<Self, CursorError> {
        let client =
            redis::Client::open(url).map_err(|e| CursorError::Transport(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CursorError::Transport(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(stream: &str) -> String {
        format!("{CURSOR_KEY_PREFIX}:{stream}")
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn load(&self, stream: &str) -> Result<Option<EntryId>, CursorError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::key(stream))
            .query_async(&mut conn)
            .await
            .map_err(|e| CursorError::Transport(e.to_string()))?;

        match value {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| CursorError::Invalid(format!("{raw}: {e}"))),
        }
    }

    async fn save(&self, stream: &str, cursor: EntryId) -> Result<(), CursorError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(Self::key(stream))
            .arg(cursor.to_string())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CursorError::Transport(e.to_string()))?;
        Ok(())
    }
}
