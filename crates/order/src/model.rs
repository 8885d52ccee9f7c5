//! Order entities.

use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, OrderNumber, ProductId};
use serde::{Deserialize, Serialize};

/// A persisted order. Exactly one exists per checked-out cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(rename = "orderNumber")]
    pub order_number: OrderNumber,
    #[serde(rename = "cartUUID")]
    pub cart_id: CartId,
    pub amount: Money,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// An order row before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub cart_id: CartId,
    pub amount: Money,
}

/// A priced line of an order. Immutable once inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
    #[serde(rename = "productID")]
    pub product_id: ProductId,
    pub quantity: u64,
    pub amount: Money,
}

/// A product price as reported by the product catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub price: Money,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, price: Money) -> Self {
        Self {
            id: id.into(),
            price,
        }
    }
}
