//! Product persistence.

mod memory;
mod postgres;

pub use memory::InMemoryProductStore;
pub use postgres::PostgresProductStore;

use async_trait::async_trait;
use common::{Money, ProductId};

use crate::error::Result;
use crate::model::Product;

/// Storage for product prices.
#[async_trait]
pub trait ProductStore: Send + Sync + 'static {
    /// Returns the products found among `ids`, ordered by id. Unknown ids
    /// are simply absent.
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Inserts one product per price and returns them with their new ids.
    async fn add_products(&self, prices: &[Money]) -> Result<Vec<Product>>;
}
