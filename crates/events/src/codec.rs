//! Wire codec between log entries and [`ProductEvent`] envelopes.
//!
//! A log entry carries a single `event` field whose value is a JSON
//! document:
//!
//! ```json
//! {"type": "update", "productId": "42", "data": {...}, "timestamp": "..."}
//! ```
//!
//! `data` is the serialized product snapshot and is absent for deletes.
//! Decoding is per-entry and total: every malformed entry maps to a
//! [`DecodeError`] value so the consumer can log it, skip the entry, and
//! keep going.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopsync_core::{EntryId, ProductId};

use crate::envelope::{ProductChange, ProductEvent, StoredEvent};
use crate::kind::EventKind;

/// Stream field holding the JSON event document.
pub const EVENT_FIELD: &str = "event";

/// An undecoded log entry as returned by the log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
}

impl RawEntry {
    pub fn new(id: EntryId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize event document: {0}")]
    Serialize(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entry has no '{EVENT_FIELD}' field")]
    MissingEventField,

    #[error("malformed event document: {0}")]
    Json(String),

    #[error("unknown event kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("invalid product id: {0}")]
    InvalidProductId(String),

    #[error("{kind} event for product '{product_id}' has no snapshot")]
    MissingSnapshot { kind: EventKind, product_id: String },

    #[error("event for product '{product_id}' has no publish timestamp")]
    MissingTimestamp { product_id: String },
}

/// JSON shape of the `event` field (original wire names).
#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,

    #[serde(rename = "productId")]
    product_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,

    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Encode an envelope into the field list appended to the log.
pub fn encode_fields(event: &ProductEvent) -> Result<Vec<(&'static str, String)>, EncodeError> {
    let wire = WireEvent {
        kind: event.kind().as_str().to_owned(),
        product_id: event.product_id().to_string(),
        data: event.change().snapshot().cloned(),
        timestamp: Some(event.published_at()),
    };

    let document = serde_json::to_string(&wire).map_err(|e| EncodeError::Serialize(e.to_string()))?;
    Ok(vec![(EVENT_FIELD, document)])
}

/// Decode one raw log entry into a [`StoredEvent`].
pub fn decode_entry(entry: RawEntry) -> Result<StoredEvent, DecodeError> {
    let document = entry
        .fields
        .get(EVENT_FIELD)
        .ok_or(DecodeError::MissingEventField)?;

    let wire: WireEvent =
        serde_json::from_str(document).map_err(|e| DecodeError::Json(e.to_string()))?;

    let kind: EventKind = wire.kind.parse().map_err(|_| DecodeError::UnknownKind {
        kind: wire.kind.clone(),
    })?;

    let product_id =
        ProductId::new(wire.product_id).map_err(|e| DecodeError::InvalidProductId(e.to_string()))?;

    let published_at = wire.timestamp.ok_or_else(|| DecodeError::MissingTimestamp {
        product_id: product_id.to_string(),
    })?;

    let change = match kind {
        EventKind::Create => ProductChange::Created {
            snapshot: wire.data.ok_or_else(|| DecodeError::MissingSnapshot {
                kind,
                product_id: product_id.to_string(),
            })?,
        },
        EventKind::Update => ProductChange::Updated {
            snapshot: wire.data.ok_or_else(|| DecodeError::MissingSnapshot {
                kind,
                product_id: product_id.to_string(),
            })?,
        },
        // A stray `data` field on a delete is tolerated and dropped.
        EventKind::Delete => ProductChange::Deleted,
    };

    let event = ProductEvent::new(product_id, change).with_published_at(published_at);
    Ok(StoredEvent::new(entry.id, event))
}
