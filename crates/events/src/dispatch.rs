//! Kind-based event routing.
//!
//! The dispatcher is pure routing: it owns no state and performs no
//! retries. Routing is an exhaustive `match` over [`ProductChange`], so
//! the kind-to-handler table is checked at compile time: adding a kind
//! without a handler arm is a build error, and an unrecognized kind cannot
//! reach the dispatcher at all (it is rejected earlier, at decode).
//! Handler failures are returned to the caller (the consumer loop), which
//! logs them and moves on.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use shopsync_core::ProductId;

use crate::envelope::{ProductChange, ProductEvent};

/// Handles the three product mutation kinds.
///
/// Implementations must be **idempotent**: the log delivers at-least-once,
/// so the same event may arrive more than once.
#[async_trait]
pub trait ProductEventHandler: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    async fn on_create(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error>;

    async fn on_update(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error>;

    async fn on_delete(&self, product_id: &ProductId) -> Result<(), Self::Error>;
}

#[async_trait]
impl<H> ProductEventHandler for Arc<H>
where
    H: ProductEventHandler + ?Sized,
{
    type Error = H::Error;

    async fn on_create(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        (**self).on_create(product_id, snapshot).await
    }

    async fn on_update(
        &self,
        product_id: &ProductId,
        snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        (**self).on_update(product_id, snapshot).await
    }

    async fn on_delete(&self, product_id: &ProductId) -> Result<(), Self::Error> {
        (**self).on_delete(product_id).await
    }
}

/// Routes a decoded envelope to the handler method for its kind.
#[derive(Debug)]
pub struct Dispatcher<H> {
    handler: H,
}

impl<H> Dispatcher<H>
where
    H: ProductEventHandler,
{
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn dispatch(&self, event: &ProductEvent) -> Result<(), H::Error> {
        match event.change() {
            ProductChange::Created { snapshot } => {
                self.handler.on_create(event.product_id(), snapshot).await
            }
            ProductChange::Updated { snapshot } => {
                self.handler.on_update(event.product_id(), snapshot).await
            }
            ProductChange::Deleted => self.handler.on_delete(event.product_id()).await,
        }
    }
}
