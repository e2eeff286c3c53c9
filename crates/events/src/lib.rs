//! Product change events: envelope, wire codec, and kind dispatch.

pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod kind;

pub use codec::{DecodeError, EncodeError, RawEntry, decode_entry, encode_fields};
pub use dispatch::{Dispatcher, ProductEventHandler};
pub use envelope::{ProductChange, ProductEvent, StoredEvent};
pub use kind::EventKind;
