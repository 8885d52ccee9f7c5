use async_trait::async_trait;
use common::{CartId, CartStatus, CartUpdate, OrderNumber, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::CartStore;
use crate::error::{CartError, Result};
use crate::model::{Cart, LineItem};

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL-backed cart store.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
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

    fn row_to_cart(row: PgRow) -> Result<Cart> {
        let status = row
            .try_get::<Option<String>, _>("status")?
            .map(|s| s.parse::<CartStatus>())
            .transpose()
            .map_err(|e| CartError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(Cart {
            id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
            status,
            order_number: row
                .try_get::<Option<String>, _>("order_number")?
                .map(OrderNumber::from),
        })
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    #[tracing::instrument(skip(self))]
    async fn create_cart(&self, cart_id: CartId) -> Result<()> {
        sqlx::query("INSERT INTO carts (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT id, status, order_number FROM carts WHERE id = $1")
            .bind(cart_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_cart).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn upsert_line_item(&self, cart_id: CartId, item: LineItem) -> Result<()> {
        let quantity = i64::try_from(item.quantity)
            .map_err(|_| CartError::Validation(format!("quantity {} is too large", item.quantity)))?;
        sqlx::query(
            r#"
            INSERT INTO cart_line_items (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(item.product_id.as_i64())
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
            {
                return CartError::CartNotFound(cart_id);
            }
            CartError::Database(e)
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_open_cart_items(&self, cart_id: CartId) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT li.product_id, li.quantity
            FROM cart_line_items li
            INNER JOIN carts c ON c.id = li.cart_id
            WHERE c.id = $1
              AND (c.status IS NULL OR c.status NOT IN ('ORDER_PROCESSING', 'ORDER_CREATED'))
            ORDER BY li.product_id ASC
            "#,
        )
        .bind(cart_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LineItem {
                    product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
                    quantity: row.try_get::<i64, _>("quantity")? as u64,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn begin_checkout(&self, cart_id: CartId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE carts SET status = $1, updated_at = NOW() WHERE id = $2 AND status IS NULL",
        )
        .bind(CartStatus::OrderProcessing.as_str())
        .bind(cart_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn update_cart(&self, cart_id: CartId, update: &CartUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE carts SET status = $1, order_number = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(update.status.as_str())
        .bind(update.order_number.as_ref().map(OrderNumber::as_str))
        .bind(cart_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
