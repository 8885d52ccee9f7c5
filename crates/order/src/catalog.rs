//! Product price lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, ProductId};
use serde::Deserialize;

use crate::error::{OrderError, Result};
use crate::model::Product;

/// Resolves unit prices for products.
#[async_trait]
pub trait ProductCatalog: Send + Sync + 'static {
    /// Returns the products found among `ids`, in no particular order.
    /// Unknown ids are simply absent from the result.
    async fn list_products(&self, ids: &[ProductId]) -> Result<Vec<Product>>;
}

#[derive(Deserialize)]
struct ProductResponse {
    id: u64,
    price: f64,
}

/// Product service client: `GET /products?ids=1,2,3` returning `[{id, price}]`.
pub struct HttpProductCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl HttpProductCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn ids_param(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ProductId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    #[tracing::instrument(skip(self), fields(count = ids.len()))]
    async fn list_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let response = self
            .http
            .get(format!("{}/products", self.base_url))
            .query(&[("ids", ids_param(ids))])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrderError::Catalog(format!("{status}: {body}")));
        }

        let products: Vec<ProductResponse> = response.json().await?;
        Ok(products
            .into_iter()
            .map(|p| Product::new(p.id, Money::from_decimal(p.price)))
            .collect())
    }
}

#[derive(Default)]
struct CatalogState {
    prices: HashMap<ProductId, Money>,
    fail: bool,
    requests: usize,
}

/// In-memory catalog for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product, builder style.
    pub fn with_product(self, id: impl Into<ProductId>, price: Money) -> Self {
        self.set_price(id, price);
        self
    }

    pub fn set_price(&self, id: impl Into<ProductId>, price: Money) {
        self.write().prices.insert(id.into(), price);
    }

    /// Makes every subsequent lookup fail.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Number of lookups served so far.
    pub fn request_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).requests
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn list_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let mut state = self.write();
        state.requests += 1;
        if state.fail {
            return Err(OrderError::Catalog("product service unavailable".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.prices.get(id).map(|price| Product::new(*id, *price)))
            .collect())
    }
}
