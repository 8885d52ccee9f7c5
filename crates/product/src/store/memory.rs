use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId};
use tokio::sync::RwLock;

use super::ProductStore;
use crate::error::{ProductError, Result};
use crate::model::Product;

#[derive(Default)]
struct State {
    prices: BTreeMap<ProductId, Money>,
    next_id: u64,
}

/// In-memory product store for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryProductStore {
    state: Arc<RwLock<State>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a database error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    async fn check(&self) -> Result<()> {
        if *self.fail.read().await {
            return Err(ProductError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        self.check().await?;
        let state = self.state.read().await;
        let mut products: Vec<Product> = ids
            .iter()
            .filter_map(|id| state.prices.get(id).map(|price| Product::new(*id, *price)))
            .collect();
        products.sort_by_key(|p| p.id);
        products.dedup();
        Ok(products)
    }

    async fn add_products(&self, prices: &[Money]) -> Result<Vec<Product>> {
        self.check().await?;
        if prices.is_empty() {
            return Err(ProductError::Validation(
                "at least one product is required".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        let mut added = Vec::with_capacity(prices.len());
        for price in prices {
            state.next_id += 1;
            let id = ProductId::new(state.next_id);
            state.prices.insert(id, *price);
            added.push(Product::new(id, *price));
        }
        Ok(added)
    }
}
