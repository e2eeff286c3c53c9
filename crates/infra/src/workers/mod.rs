//! Background workers.

pub mod consumer;

pub use consumer::{Consumer, ConsumerHandle, ConsumerOptions};
