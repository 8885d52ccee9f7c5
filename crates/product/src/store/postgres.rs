use async_trait::async_trait;
use common::{Money, ProductId};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};

use super::ProductStore;
use crate::error::{ProductError, Result};
use crate::model::Product;

/// PostgreSQL-backed product store.
#[derive(Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let id = row.try_get::<i64, _>("id")?;
        let id = u64::try_from(id).map_err(|e| {
            ProductError::Database(sqlx::Error::Decode(Box::new(e)))
        })?;
        Ok(Product::new(
            id,
            Money::from_cents(row.try_get::<i64, _>("price_cents")?),
        ))
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        // BIGSERIAL ids never exceed i64::MAX
        let ids: Vec<i64> = ids
            .iter()
            .filter_map(|id| i64::try_from(id.as_u64()).ok())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows =
            sqlx::query("SELECT id, price_cents FROM products WHERE id = ANY($1) ORDER BY id")
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Self::row_to_product).collect()
    }

    #[tracing::instrument(skip(self, prices), fields(count = prices.len()))]
    async fn add_products(&self, prices: &[Money]) -> Result<Vec<Product>> {
        if prices.is_empty() {
            return Err(ProductError::Validation(
                "at least one product is required".to_string(),
            ));
        }
        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO products (price_cents) ");
        builder.push_values(prices, |mut row, price| {
            row.push_bind(price.cents());
        });
        builder.push(" RETURNING id, price_cents");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut products = rows
            .into_iter()
            .map(Self::row_to_product)
            .collect::<Result<Vec<_>>>()?;
        products.sort_by_key(|p| p.id);
        Ok(products)
    }
}
