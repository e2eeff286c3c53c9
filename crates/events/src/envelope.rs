use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopsync_core::{EntryId, ProductId};

use crate::kind::EventKind;

/// The mutation a product event carries.
///
/// The payload rule lives in the type: `Created`/`Updated` always carry the
/// serialized product snapshot, `Deleted` never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductChange {
    Created { snapshot: JsonValue },
    Updated { snapshot: JsonValue },
    Deleted,
}

impl ProductChange {
    pub fn kind(&self) -> EventKind {
        match self {
            ProductChange::Created { .. } => EventKind::Create,
            ProductChange::Updated { .. } => EventKind::Update,
            ProductChange::Deleted => EventKind::Delete,
        }
    }

    /// The product snapshot, when the change carries one.
    pub fn snapshot(&self) -> Option<&JsonValue> {
        match self {
            ProductChange::Created { snapshot } | ProductChange::Updated { snapshot } => {
                Some(snapshot)
            }
            ProductChange::Deleted => None,
        }
    }
}

/// Envelope for one product mutation, the unit appended to the log.
///
/// Envelopes are created by the producer at publish time and are immutable
/// afterwards. The log-assigned id lives outside the envelope (see
/// [`StoredEvent`]); `published_at` is filled by the constructor unless the
/// write-path collaborator supplies its own business time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductEvent {
    product_id: ProductId,
    published_at: DateTime<Utc>,
    change: ProductChange,
}

impl ProductEvent {
    pub fn new(product_id: ProductId, change: ProductChange) -> Self {
        Self {
            product_id,
            published_at: Utc::now(),
            change,
        }
    }

    pub fn create(product_id: ProductId, snapshot: JsonValue) -> Self {
        Self::new(product_id, ProductChange::Created { snapshot })
    }

    pub fn update(product_id: ProductId, snapshot: JsonValue) -> Self {
        Self::new(product_id, ProductChange::Updated { snapshot })
    }

    pub fn delete(product_id: ProductId) -> Self {
        Self::new(product_id, ProductChange::Deleted)
    }

    /// Override the publish timestamp (callers that track business time).
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn change(&self) -> &ProductChange {
        &self.change
    }

    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }
}

/// A decoded log entry: the log-assigned id plus the envelope it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    id: EntryId,
    event: ProductEvent,
}

impl StoredEvent {
    pub fn new(id: EntryId, event: ProductEvent) -> Self {
        Self { id, event }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn event(&self) -> &ProductEvent {
        &self.event
    }

    pub fn into_event(self) -> ProductEvent {
        self.event
    }
}
