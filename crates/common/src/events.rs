//! Saga wire messages exchanged through the broker.
//!
//! These are not persisted entities; each message is the unit of
//! at-least-once delivery, so every consumer must tolerate receiving the
//! same payload more than once.

use serde::{Deserialize, Serialize};

use crate::{CartId, CartStatus, OrderNumber, ProductId};

/// Topic carrying [`CreateOrderEvent`]s from the cart service to the order service.
pub const CREATE_ORDER_TOPIC: &str = "order.create";

/// Topic carrying [`UpdateCartEvent`]s from the order service to the cart service.
pub const UPDATE_CART_TOPIC: &str = "cart.update";

/// Returns the consumer group id for a service consuming a topic:
/// `{topic}.{service}.consumer.group`.
///
/// One group per consuming service per topic keeps offsets independent.
pub fn consumer_group_id(topic: &str, service: &str) -> String {
    format!("{topic}.{service}.consumer.group")
}

/// Request to turn a cart's contents into an order.
///
/// Also the body of the synchronous `POST /orders` contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderEvent {
    #[serde(rename = "cartUUID")]
    pub cart_id: CartId,
    pub products: Vec<OrderedProduct>,
}

/// A product and the quantity ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedProduct {
    #[serde(rename = "productID")]
    pub product_id: ProductId,
    pub quantity: u64,
}

impl OrderedProduct {
    pub fn new(product_id: impl Into<ProductId>, quantity: u64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Instruction for the cart service to record a checkout outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCartEvent {
    pub update: CartUpdate,
    pub filter: CartFilter,
}

impl UpdateCartEvent {
    /// Builds the event sent once an order has been created for a cart.
    pub fn order_created(cart_id: CartId, order_number: OrderNumber) -> Self {
        Self {
            update: CartUpdate {
                status: CartStatus::OrderCreated,
                order_number: Some(order_number),
            },
            filter: CartFilter { cart_id },
        }
    }
}

/// The two cart columns written by a status update.
///
/// Also the body of the `PATCH /carts/{uuid}` contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartUpdate {
    pub status: CartStatus,
    #[serde(rename = "orderNumber")]
    pub order_number: Option<OrderNumber>,
}

/// Selects the cart an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartFilter {
    #[serde(rename = "cartUUID")]
    pub cart_id: CartId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_group_naming() {
        assert_eq!(
            consumer_group_id(CREATE_ORDER_TOPIC, "order"),
            "order.create.order.consumer.group"
        );
        assert_eq!(
            consumer_group_id(UPDATE_CART_TOPIC, "cart"),
            "cart.update.cart.consumer.group"
        );
    }

    #[test]
    fn test_create_order_wire_shape() {
        let cart_id = CartId::new();
        let event = CreateOrderEvent {
            cart_id,
            products: vec![OrderedProduct::new(5, 2), OrderedProduct::new(7, 1)],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cartUUID": cart_id.to_string(),
                "products": [
                    {"productID": 5, "quantity": 2},
                    {"productID": 7, "quantity": 1}
                ]
            })
        );
    }

    #[test]
    fn test_update_cart_wire_shape() {
        let cart_id = CartId::new();
        let event = UpdateCartEvent::order_created(cart_id, OrderNumber::new("20240131ABCDEFGH"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "update": {"status": "ORDER_CREATED", "orderNumber": "20240131ABCDEFGH"},
                "filter": {"cartUUID": cart_id.to_string()}
            })
        );
    }

    #[test]
    fn test_update_cart_accepts_null_order_number() {
        let cart_id = CartId::new();
        let raw = format!(
            r#"{{"update":{{"status":"ORDER_PROCESSING","orderNumber":null}},"filter":{{"cartUUID":"{cart_id}"}}}}"#
        );
        let event: UpdateCartEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(event.update.status, CartStatus::OrderProcessing);
        assert!(event.update.order_number.is_none());
        assert_eq!(event.filter.cart_id, cart_id);
    }

    #[test]
    fn test_malformed_create_order_is_rejected() {
        let result = serde_json::from_str::<CreateOrderEvent>(r#"{"products": []}"#);
        assert!(result.is_err());
    }
}
