//! Event producer: best-effort, fire-and-forget publication.
//!
//! Write-path collaborators call [`Producer::publish`] *after* their
//! primary-store commit succeeded. The call never blocks and never fails
//! the caller: events go onto a bounded queue drained by one background
//! task that appends to the log. Append failures (and drops on a full
//! queue) are logged only: the stream is a notification channel, not a
//! correctness dependency, and the worst case is transient cache staleness.

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shopsync_core::ProductId;
use shopsync_events::envelope::ProductEvent;

use crate::log_store::EventLog;

/// Default publish queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Cloneable publish handle. Dropping every clone drains the queue and
/// stops the background task.
#[derive(Debug, Clone)]
pub struct Producer {
    tx: mpsc::Sender<ProductEvent>,
}

/// Join handle for the producer's background task; await it after dropping
/// all [`Producer`] clones for a clean teardown.
#[derive(Debug)]
pub struct ProducerHandle {
    join: JoinHandle<()>,
}

impl ProducerHandle {
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

impl Producer {
    /// Spawn the background append task and return the publish handle.
    pub fn spawn<L>(log: L, stream: impl Into<String>, queue_capacity: usize) -> (Self, ProducerHandle)
    where
        L: EventLog + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let join = tokio::spawn(run(log, stream.into(), rx));
        (Self { tx }, ProducerHandle { join })
    }

    /// Enqueue one event for publication. Returns immediately; a full or
    /// closed queue drops the event with a warning.
    pub fn publish(&self, event: ProductEvent) {
        if let Err(rejected) = self.tx.try_send(event) {
            let (event, reason) = match &rejected {
                mpsc::error::TrySendError::Full(e) => (e, "queue full"),
                mpsc::error::TrySendError::Closed(e) => (e, "producer stopped"),
            };
            warn!(
                kind = %event.kind(),
                product_id = %event.product_id(),
                reason,
                "dropping product event"
            );
        }
    }

    pub fn publish_create(&self, product_id: ProductId, snapshot: JsonValue) {
        self.publish(ProductEvent::create(product_id, snapshot));
    }

    pub fn publish_update(&self, product_id: ProductId, snapshot: JsonValue) {
        self.publish(ProductEvent::update(product_id, snapshot));
    }

    pub fn publish_delete(&self, product_id: ProductId) {
        self.publish(ProductEvent::delete(product_id));
    }
}

async fn run<L>(log: L, stream: String, mut rx: mpsc::Receiver<ProductEvent>)
where
    L: EventLog,
{
    while let Some(event) = rx.recv().await {
        match log.append(&stream, &event).await {
            Ok(id) => debug!(
                id = %id,
                kind = %event.kind(),
                product_id = %event.product_id(),
                "product event appended"
            ),
            Err(error) => warn!(
                error = %error,
                kind = %event.kind(),
                product_id = %event.product_id(),
                "failed to append product event"
            ),
        }
    }
    debug!(stream = %stream, "producer queue drained");
}
