//! Update-cart delivery handler.

use async_trait::async_trait;
use broker::{DeliveryHandler, HandlerError, Record};
use common::UpdateCartEvent;
use tracing::info;

use crate::store::CartStore;

/// Applies [`UpdateCartEvent`]s to the cart store.
///
/// The write is a blind update of status and order number, so a redelivered
/// event simply writes the same values again.
pub struct UpdateCartHandler<S> {
    store: S,
}

impl<S: CartStore> UpdateCartHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: CartStore> DeliveryHandler for UpdateCartHandler<S> {
    #[tracing::instrument(skip(self, record), fields(partition = record.partition, offset = record.offset))]
    async fn process(&self, record: &Record) -> Result<(), HandlerError> {
        let event: UpdateCartEvent = serde_json::from_slice(&record.payload)?;
        self.store
            .update_cart(event.filter.cart_id, &event.update)
            .await?;

        metrics::counter!("cart_updates_applied_total").increment(1);
        info!(
            cart_id = %event.filter.cart_id,
            status = event.update.status.as_str(),
            "cart updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{CartId, CartStatus, OrderNumber};

    use super::*;
    use crate::model::LineItem;
    use crate::store::InMemoryCartStore;

    fn record(payload: impl Into<Vec<u8>>) -> Record {
        Record {
            topic: common::UPDATE_CART_TOPIC.to_string(),
            partition: 0,
            offset: 0,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_update_event_marks_cart_created() {
        let store = InMemoryCartStore::new();
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();
        store.upsert_line_item(cart_id, LineItem::new(1, 1)).await.unwrap();
        let handler = UpdateCartHandler::new(store.clone());
        let order_number = OrderNumber::new("20240131ABCDEFGH");
        let event = UpdateCartEvent::order_created(cart_id, order_number.clone());

        let payload = serde_json::to_vec(&event).unwrap();
        handler.process(&record(payload.clone())).await.unwrap();
        handler.process(&record(payload)).await.unwrap();

        let cart = store.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.status, Some(CartStatus::OrderCreated));
        assert_eq!(cart.order_number, Some(order_number));
        assert!(store.list_open_cart_items(cart_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let handler = UpdateCartHandler::new(InMemoryCartStore::new());
        assert!(handler.process(&record("not json")).await.is_err());
        assert!(handler.process(&record(r#"{"update":{}}"#)).await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let store = InMemoryCartStore::new();
        store.set_fail_on_update(true).await;
        let handler = UpdateCartHandler::new(store);
        let event =
            UpdateCartEvent::order_created(CartId::new(), OrderNumber::new("20240131ABCDEFGH"));

        let result = handler
            .process(&record(serde_json::to_vec(&event).unwrap()))
            .await;
        assert!(result.is_err());
    }
}
