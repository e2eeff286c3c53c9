//! In-memory event log for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use shopsync_core::EntryId;
use shopsync_events::envelope::ProductEvent;
use shopsync_events::{RawEntry, codec};

use super::{EventLog, LogError};

#[derive(Debug, Default)]
struct Shared {
    streams: HashMap<String, Vec<RawEntry>>,
    next_seq: u64,
    closed: bool,
    injected_errors: VecDeque<LogError>,
}

/// In-memory append-only log with blocking-read semantics.
///
/// Entries are stored in wire form so reads exercise the same decode path
/// as the Redis log. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    inner: Mutex<Shared>,
    notify: Notify,
    read_calls: AtomicU64,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the log: every subsequent read or append fails with
    /// [`LogError::Closed`] and blocked readers wake immediately.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Queue an error to be returned by the next `read` call (fault
    /// injection for consumer tests).
    pub fn fail_next_read(&self, error: LogError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.injected_errors.push_back(error);
        }
        self.notify.notify_waiters();
    }

    /// Number of `read` calls issued so far.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of entries appended to `stream`.
    pub fn len(&self, stream: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.streams.get(stream).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Append a pre-encoded entry, bypassing the codec. Tests use this to
    /// exercise the consumer's handling of malformed entries.
    pub fn append_raw_fields(&self, stream: &str, fields: HashMap<String, String>) -> EntryId {
        self.push(stream, fields).expect("append to closed log")
    }

    fn push(&self, stream: &str, fields: HashMap<String, String>) -> Result<EntryId, LogError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| LogError::Transport("lock poisoned".into()))?;
        if inner.closed {
            return Err(LogError::Closed);
        }
        inner.next_seq += 1;
        let id = EntryId::new(0, inner.next_seq);
        inner
            .streams
            .entry(stream.to_owned())
            .or_default()
            .push(RawEntry::new(id, fields));
        drop(inner);
        self.notify.notify_waiters();
        Ok(id)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, stream: &str, event: &ProductEvent) -> Result<EntryId, LogError> {
        let fields: HashMap<String, String> = codec::encode_fields(event)?
            .into_iter()
            .map(|(field, value)| (field.to_owned(), value))
            .collect();

        self.push(stream, fields)
    }

    async fn read(
        &self,
        stream: &str,
        after: EntryId,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, LogError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + block;

        loop {
            // Register for wakeups before checking state, so an append
            // between the check and the wait is not lost.
            let notified = self.notify.notified();

            {
                let mut inner = self
                    .inner
                    .lock()
                    .map_err(|_| LogError::Transport("lock poisoned".into()))?;
                if let Some(error) = inner.injected_errors.pop_front() {
                    return Err(error);
                }
                if inner.closed {
                    return Err(LogError::Closed);
                }
                if let Some(entries) = inner.streams.get(stream) {
                    let batch: Vec<RawEntry> = entries
                        .iter()
                        .filter(|e| e.id > after)
                        .take(max_count)
                        .cloned()
                        .collect();
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(vec![]);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(vec![]),
            }
        }
    }
}
