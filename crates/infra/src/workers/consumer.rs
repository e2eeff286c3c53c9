//! Consumer loop: polls the log and materializes entries into the cache.
//!
//! One instance runs as a background task for the process lifetime; it is
//! the stream's single reader. Each iteration issues one bounded-blocking
//! read, applies the returned batch strictly in ascending id order, and
//! advances the cursor per entry *after* dispatch, so a crash between
//! apply and advance redelivers that entry (at-least-once; handlers are
//! idempotent).
//!
//! Shutdown is cooperative: the signal is observed between iterations
//! only, never mid-batch. An in-flight batch finishes applying (success or
//! logged failure) before the loop re-checks the signal; after the signal
//! fires, no further reads are issued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shopsync_core::EntryId;
use shopsync_events::codec::DecodeError;
use shopsync_events::{Dispatcher, ProductEventHandler, RawEntry, codec};

use crate::cursor::CursorStore;
use crate::log_store::{EventLog, LogError};

/// Tuning knobs for the consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Max entries fetched per poll.
    pub batch_size: usize,
    /// Server-side blocking window of one poll.
    pub block: Duration,
    /// Outer deadline on one poll; kept strictly longer than `block`.
    pub read_timeout: Duration,
    /// Fixed delay after an unexpected transport error.
    pub backoff: Duration,
    /// Liveness log interval.
    pub heartbeat: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_secs(5),
            read_timeout: Duration::from_secs(6),
            backoff: Duration::from_secs(1),
            heartbeat: Duration::from_secs(60),
        }
    }
}

impl ConsumerOptions {
    /// The outer poll deadline, forced past the blocking window so a
    /// healthy blocking read can never trip it.
    fn effective_read_timeout(&self) -> Duration {
        if self.read_timeout > self.block {
            self.read_timeout
        } else {
            self.block + Duration::from_secs(1)
        }
    }
}

/// The consumer loop, ready to be spawned.
#[derive(Debug)]
pub struct Consumer<L, H, S> {
    log: L,
    dispatcher: Dispatcher<H>,
    cursors: S,
    stream: String,
    options: ConsumerOptions,
}

/// Handle to the running loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Fire the shutdown signal without waiting for the loop to stop.
    pub fn trigger_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

impl<L, H, S> Consumer<L, H, S>
where
    L: EventLog + 'static,
    H: ProductEventHandler + 'static,
    S: CursorStore + 'static,
{
    pub fn new(log: L, dispatcher: Dispatcher<H>, cursors: S, stream: impl Into<String>) -> Self {
        Self {
            log,
            dispatcher,
            cursors,
            stream: stream.into(),
            options: ConsumerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawn the loop as a background task.
    pub fn spawn(self) -> ConsumerHandle {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(self.run(shutdown.clone()));
        ConsumerHandle { shutdown, join }
    }

    async fn run(self, shutdown: Arc<Notify>) {
        let mut cursor = match self.cursors.load(&self.stream).await {
            Ok(Some(id)) => {
                info!(stream = %self.stream, cursor = %id, "resuming from persisted cursor");
                id
            }
            Ok(None) => EntryId::ZERO,
            Err(error) => {
                warn!(
                    stream = %self.stream,
                    error = %error,
                    "failed to load cursor; replaying stream from the start"
                );
                EntryId::ZERO
            }
        };

        info!(stream = %self.stream, cursor = %cursor, "consumer loop started");

        let read_timeout = self.options.effective_read_timeout();
        let mut heartbeat = tokio::time::interval(self.options.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // An interval's first tick completes immediately; swallow it so the
        // heartbeat fires one full period after startup.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    info!(stream = %self.stream, cursor = %cursor, "consumer loop shutting down");
                    break;
                }

                _ = heartbeat.tick() => {
                    info!(
                        stream = %self.stream,
                        cursor = %cursor,
                        "consumer heartbeat: waiting for events"
                    );
                }

                outcome = tokio::time::timeout(
                    read_timeout,
                    self.log.read(&self.stream, cursor, self.options.batch_size, self.options.block),
                ) => {
                    match outcome {
                        // Deadline or blocking window elapsed: same as an
                        // empty read, no noise.
                        Err(_) | Ok(Err(LogError::Timeout)) => {}

                        Ok(Err(LogError::Closed)) => {
                            info!(stream = %self.stream, "log store closed; stopping consumer");
                            break;
                        }

                        Ok(Err(error)) => {
                            warn!(
                                stream = %self.stream,
                                error = %error,
                                "log read failed; backing off"
                            );
                            tokio::time::sleep(self.options.backoff).await;
                        }

                        Ok(Ok(entries)) => {
                            if entries.is_empty() {
                                continue;
                            }
                            debug!(
                                stream = %self.stream,
                                count = entries.len(),
                                "processing log entries"
                            );
                            for entry in entries {
                                let id = entry.id;
                                self.apply(entry).await;

                                // The cursor advances whether or not the
                                // entry applied cleanly; failed entries are
                                // logged, never retried.
                                cursor = id;
                                if let Err(error) = self.cursors.save(&self.stream, cursor).await {
                                    warn!(
                                        stream = %self.stream,
                                        cursor = %cursor,
                                        error = %error,
                                        "failed to persist cursor"
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        info!(stream = %self.stream, cursor = %cursor, "consumer loop stopped");
    }

    async fn apply(&self, entry: RawEntry) {
        let id = entry.id;
        match codec::decode_entry(entry) {
            Ok(stored) => {
                let event = stored.event();
                if let Err(error) = self.dispatcher.dispatch(event).await {
                    warn!(
                        id = %id,
                        kind = %event.kind(),
                        product_id = %event.product_id(),
                        error = ?error,
                        "event handler failed; skipping entry"
                    );
                }
            }
            Err(DecodeError::UnknownKind { kind }) => {
                warn!(id = %id, kind = %kind, "unknown event kind; ignoring entry");
            }
            Err(error) => {
                warn!(id = %id, error = %error, "undecodable log entry; skipping");
            }
        }
    }
}
