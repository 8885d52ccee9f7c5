//! Create-order delivery handler.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{DeliveryHandler, HandlerError, Record};
use common::CreateOrderEvent;

use crate::carts::CartGateway;
use crate::catalog::ProductCatalog;
use crate::creator::OrderCreator;
use crate::store::OrderStore;

/// Feeds [`CreateOrderEvent`]s to the [`OrderCreator`]. Any error leaves the
/// record unmarked so the broker delivers it again.
pub struct CreateOrderHandler<S, C, G> {
    creator: Arc<OrderCreator<S, C, G>>,
}

impl<S, C, G> CreateOrderHandler<S, C, G> {
    pub fn new(creator: Arc<OrderCreator<S, C, G>>) -> Self {
        Self { creator }
    }
}

#[async_trait]
impl<S, C, G> DeliveryHandler for CreateOrderHandler<S, C, G>
where
    S: OrderStore,
    C: ProductCatalog,
    G: CartGateway,
{
    #[tracing::instrument(skip(self, record), fields(partition = record.partition, offset = record.offset))]
    async fn process(&self, record: &Record) -> Result<(), HandlerError> {
        let event: CreateOrderEvent = serde_json::from_slice(&record.payload)?;
        self.creator.create_order(&event).await?;
        Ok(())
    }
}
