//! Product domain types.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A product and its unit price.
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

/// Wire shape of a product: `{"id": 5, "price": 10.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: u64,
    pub price: f64,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.as_u64(),
            price: product.price.as_decimal(),
        }
    }
}
