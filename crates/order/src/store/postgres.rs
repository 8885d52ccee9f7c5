use async_trait::async_trait;
use common::{CartId, Money, OrderId, OrderNumber, ProductId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use super::OrderStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{NewOrder, Order, OrderLineItem};

const UNIQUE_CART_CONSTRAINT: &str = "orders_cart_id_unique";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> StoreResult<Order> {
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            order_number: OrderNumber::new(row.try_get::<String, _>("order_number")?),
            cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.rollback().await?;
        Ok(())
    }

    async fn find_by_cart(
        &self,
        tx: Option<&mut Self::Tx>,
        cart_id: CartId,
    ) -> StoreResult<Option<Order>> {
        let query = sqlx::query(
            "SELECT id, order_number, cart_id, amount_cents, created_at FROM orders WHERE cart_id = $1",
        )
        .bind(cart_id.as_uuid());

        let row = match tx {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self, tx, order), fields(cart_id = %order.cart_id))]
    async fn create_order(
        &self,
        tx: Option<&mut Self::Tx>,
        order: &NewOrder,
    ) -> StoreResult<OrderId> {
        let query = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO orders (order_number, cart_id, amount_cents)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(order.order_number.as_str())
        .bind(order.cart_id.as_uuid())
        .bind(order.amount.cents());

        let result = match tx {
            Some(tx) => query.fetch_one(&mut **tx).await,
            None => query.fetch_one(&self.pool).await,
        };
        let id = result.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_CART_CONSTRAINT)
            {
                return StoreError::DuplicateOrder(order.cart_id);
            }
            StoreError::Database(e)
        })?;
        Ok(OrderId::new(id))
    }

    #[tracing::instrument(skip(self, tx, items), fields(count = items.len()))]
    async fn bulk_insert_line_items(
        &self,
        tx: Option<&mut Self::Tx>,
        items: &[OrderLineItem],
    ) -> StoreResult<()> {
        let Some(first) = items.first() else {
            return Err(StoreError::EmptyLineItems);
        };

        let quantities = items
            .iter()
            .map(|item| {
                i64::try_from(item.quantity)
                    .map_err(|_| StoreError::QuantityOutOfRange(item.quantity))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO order_line_items (order_id, product_id, quantity, amount_cents) ",
        );
        builder.push_values(items.iter().zip(quantities), |mut row, (item, quantity)| {
            row.push_bind(item.order_id.as_i64())
                .push_bind(item.product_id.as_i64())
                .push_bind(quantity)
                .push_bind(item.amount.cents());
        });
        let query = builder.build();

        let result = match tx {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        };
        result.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
            {
                return StoreError::UnknownOrder(first.order_id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn line_items(&self, order_id: OrderId) -> StoreResult<Vec<OrderLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, amount_cents
            FROM order_line_items
            WHERE order_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OrderLineItem {
                    order_id: OrderId::new(row.try_get("order_id")?),
                    product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
                    quantity: row.try_get::<i64, _>("quantity")? as u64,
                    amount: Money::from_cents(row.try_get("amount_cents")?),
                })
            })
            .collect()
    }
}
