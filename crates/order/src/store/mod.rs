//! Order persistence.
//!
//! Writes take an explicit optional transaction handle: with `Some(tx)` the
//! statement joins the caller's transaction, with `None` it runs as its own
//! auto-committed statement. A transaction is owned by exactly one caller and
//! must be finished with [`OrderStore::commit`] or [`OrderStore::rollback`].

mod memory;
mod postgres;

pub use memory::{InMemoryOrderStore, InMemoryTx};
pub use postgres::PostgresOrderStore;

use async_trait::async_trait;
use common::{CartId, OrderId};

use crate::error::StoreResult;
use crate::model::{NewOrder, Order, OrderLineItem};

/// Storage for orders and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// An open transaction.
    type Tx: Send;

    /// Starts a transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Commits a transaction, making its writes visible.
    async fn commit(&self, tx: Self::Tx) -> StoreResult<()>;

    /// Discards a transaction.
    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()>;

    /// Finds the order for a cart, including writes of `tx`.
    async fn find_by_cart(
        &self,
        tx: Option<&mut Self::Tx>,
        cart_id: CartId,
    ) -> StoreResult<Option<Order>>;

    /// Inserts an order row and returns its generated id.
    ///
    /// Fails with [`StoreError::DuplicateOrder`](crate::error::StoreError::DuplicateOrder)
    /// when the cart already has an order.
    async fn create_order(&self, tx: Option<&mut Self::Tx>, order: &NewOrder)
    -> StoreResult<OrderId>;

    /// Inserts all line items as one multi-row statement.
    ///
    /// Calling it with no items is a precondition violation and fails with
    /// [`StoreError::EmptyLineItems`](crate::error::StoreError::EmptyLineItems).
    async fn bulk_insert_line_items(
        &self,
        tx: Option<&mut Self::Tx>,
        items: &[OrderLineItem],
    ) -> StoreResult<()>;

    /// Lists the line items of an order, ordered by product id.
    async fn line_items(&self, order_id: OrderId) -> StoreResult<Vec<OrderLineItem>>;
}
