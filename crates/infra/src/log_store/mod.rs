//! Append-only log store boundary.
//!
//! The log is the ordering authority of the pipeline: entries get a
//! log-assigned, strictly increasing [`EntryId`] at append time, and the
//! consumer reads them back in that order. The subsystem never deletes
//! entries; retention is the log store's concern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use shopsync_core::EntryId;
use shopsync_events::envelope::ProductEvent;
use shopsync_events::{EncodeError, RawEntry};

pub mod in_memory;
pub mod redis;

pub use self::in_memory::InMemoryEventLog;
pub use self::redis::RedisEventLog;

/// Log store operation error.
///
/// The consumer loop classifies these: `Timeout` is expected and silent,
/// `Closed` ends the loop, everything else is logged and retried after a
/// fixed backoff.
#[derive(Debug, Error)]
pub enum LogError {
    /// The blocking window elapsed without a reply. Equivalent to an empty
    /// read.
    #[error("log read timed out")]
    Timeout,

    /// The log store has been shut down; no further reads will succeed.
    #[error("log store closed")]
    Closed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] EncodeError),

    #[error("log transport error: {0}")]
    Transport(String),
}

/// Append-only event log.
///
/// `read` contracts:
/// - returns only entries with ids strictly greater than `after`;
/// - entries are ordered by ascending id;
/// - at most `max_count` entries per call;
/// - blocks server-side for up to `block` when no entries are available,
///   then returns an empty batch.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one envelope to the tail of `stream`, returning the
    /// log-assigned entry id.
    async fn append(&self, stream: &str, event: &ProductEvent) -> Result<EntryId, LogError>;

    /// Bounded-blocking read of entries newer than `after`.
    async fn read(
        &self,
        stream: &str,
        after: EntryId,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, LogError>;
}

#[async_trait]
impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    async fn append(&self, stream: &str, event: &ProductEvent) -> Result<EntryId, LogError> {
        (**self).append(stream, event).await
    }

    async fn read(
        &self,
        stream: &str,
        after: EntryId,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, LogError> {
        (**self).read(stream, after, max_count, block).await
    }
}
