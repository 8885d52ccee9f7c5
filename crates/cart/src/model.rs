//! Cart entities.

use common::{CartId, CartStatus, OrderNumber, OrderedProduct, ProductId};
use serde::{Deserialize, Serialize};

/// A cart. Carts are never deleted, only transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(rename = "uuid")]
    pub id: CartId,
    pub status: Option<CartStatus>,
    #[serde(rename = "orderNumber")]
    pub order_number: Option<OrderNumber>,
}

impl Cart {
    /// Creates an open cart.
    pub fn open(id: CartId) -> Self {
        Self {
            id,
            status: None,
            order_number: None,
        }
    }

    /// Returns true while the cart may still be checked out.
    pub fn is_open(&self) -> bool {
        !self.status.is_some_and(|s| s.excludes_checkout())
    }
}

/// A product in a cart. One line per (cart, product).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "productID")]
    pub product_id: ProductId,
    pub quantity: u64,
}

impl LineItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

impl From<LineItem> for OrderedProduct {
    fn from(item: LineItem) -> Self {
        OrderedProduct::new(item.product_id, item.quantity)
    }
}
