use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CartId, OrderId};
use tokio::sync::RwLock;

use super::OrderStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{NewOrder, Order, OrderLineItem};

#[derive(Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    line_items: Vec<OrderLineItem>,
    next_id: i64,
    fail_on_line_items: bool,
}

impl State {
    fn by_cart(&self, cart_id: CartId) -> Option<&Order> {
        self.orders.values().find(|o| o.cart_id == cart_id)
    }

    fn allocate_order(&mut self, order: &NewOrder) -> Order {
        self.next_id += 1;
        Order {
            id: OrderId::new(self.next_id),
            order_number: order.order_number.clone(),
            cart_id: order.cart_id,
            amount: order.amount,
            created_at: Utc::now(),
        }
    }
}

/// Writes staged by an open in-memory transaction.
#[derive(Debug, Default)]
pub struct InMemoryTx {
    orders: Vec<Order>,
    line_items: Vec<OrderLineItem>,
}

/// In-memory order store for tests and local runs.
///
/// Transactions stage their writes and apply them in one step on commit;
/// the unique cart constraint is checked on insert and again on commit.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent line item insert fail with a database error.
    pub async fn set_fail_on_line_items(&self, fail: bool) {
        self.state.write().await.fail_on_line_items = fail;
    }

    /// Returns every committed order.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.values().cloned().collect()
    }

    /// Returns the number of committed line items across all orders.
    pub async fn line_item_count(&self) -> usize {
        self.state.read().await.line_items.len()
    }
}

fn check_line_items(state: &State, staged: &[Order], items: &[OrderLineItem]) -> StoreResult<()> {
    if items.is_empty() {
        return Err(StoreError::EmptyLineItems);
    }
    if state.fail_on_line_items {
        return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
    }
    for item in items {
        let known = state.orders.contains_key(&item.order_id)
            || staged.iter().any(|o| o.id == item.order_id);
        if !known {
            return Err(StoreError::UnknownOrder(item.order_id));
        }
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> StoreResult<InMemoryTx> {
        Ok(InMemoryTx::default())
    }

    async fn commit(&self, tx: InMemoryTx) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for order in &tx.orders {
            if state.by_cart(order.cart_id).is_some() {
                return Err(StoreError::DuplicateOrder(order.cart_id));
            }
        }
        for order in tx.orders {
            state.orders.insert(order.id, order);
        }
        state.line_items.extend(tx.line_items);
        Ok(())
    }

    async fn rollback(&self, _tx: InMemoryTx) -> StoreResult<()> {
        Ok(())
    }

    async fn find_by_cart(
        &self,
        tx: Option<&mut InMemoryTx>,
        cart_id: CartId,
    ) -> StoreResult<Option<Order>> {
        if let Some(staged) = tx
            .as_deref()
            .and_then(|tx| tx.orders.iter().find(|o| o.cart_id == cart_id))
        {
            return Ok(Some(staged.clone()));
        }
        Ok(self.state.read().await.by_cart(cart_id).cloned())
    }

    async fn create_order(
        &self,
        tx: Option<&mut InMemoryTx>,
        order: &NewOrder,
    ) -> StoreResult<OrderId> {
        let mut state = self.state.write().await;
        let staged_duplicate = tx
            .as_deref()
            .is_some_and(|tx| tx.orders.iter().any(|o| o.cart_id == order.cart_id));
        if staged_duplicate || state.by_cart(order.cart_id).is_some() {
            return Err(StoreError::DuplicateOrder(order.cart_id));
        }

        let row = state.allocate_order(order);
        let id = row.id;
        match tx {
            Some(tx) => tx.orders.push(row),
            None => {
                state.orders.insert(id, row);
            }
        }
        Ok(id)
    }

    async fn bulk_insert_line_items(
        &self,
        tx: Option<&mut InMemoryTx>,
        items: &[OrderLineItem],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match tx {
            Some(tx) => {
                check_line_items(&state, &tx.orders, items)?;
                tx.line_items.extend_from_slice(items);
            }
            None => {
                check_line_items(&state, &[], items)?;
                state.line_items.extend_from_slice(items);
            }
        }
        Ok(())
    }

    async fn line_items(&self, order_id: OrderId) -> StoreResult<Vec<OrderLineItem>> {
        let mut items: Vec<OrderLineItem> = self
            .state
            .read()
            .await
            .line_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .copied()
            .collect();
        items.sort_by_key(|item| item.product_id);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, OrderNumber, ProductId};

    use super::*;

    fn new_order(cart_id: CartId) -> NewOrder {
        NewOrder {
            order_number: OrderNumber::generate(),
            cart_id,
            amount: Money::from_cents(2300),
        }
    }

    fn line(order_id: OrderId, product: u64, quantity: u64, cents: i64) -> OrderLineItem {
        OrderLineItem {
            order_id,
            product_id: ProductId::new(product),
            quantity,
            amount: Money::from_cents(cents),
        }
    }

    #[tokio::test]
    async fn test_transaction_writes_invisible_until_commit() {
        let store = InMemoryOrderStore::new();
        let cart_id = CartId::new();
        let mut tx = store.begin().await.unwrap();

        let id = store.create_order(Some(&mut tx), &new_order(cart_id)).await.unwrap();
        store
            .bulk_insert_line_items(Some(&mut tx), &[line(id, 5, 2, 2000)])
            .await
            .unwrap();

        assert!(store.find_by_cart(Some(&mut tx), cart_id).await.unwrap().is_some());
        assert!(store.find_by_cart(None, cart_id).await.unwrap().is_none());
        assert!(store.line_items(id).await.unwrap().is_empty());

        store.commit(tx).await.unwrap();
        assert!(store.find_by_cart(None, cart_id).await.unwrap().is_some());
        assert_eq!(store.line_items(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = InMemoryOrderStore::new();
        let cart_id = CartId::new();
        let mut tx = store.begin().await.unwrap();
        let id = store.create_order(Some(&mut tx), &new_order(cart_id)).await.unwrap();
        store
            .bulk_insert_line_items(Some(&mut tx), &[line(id, 5, 2, 2000)])
            .await
            .unwrap();

        store.rollback(tx).await.unwrap();

        assert!(store.orders().await.is_empty());
        assert_eq!(store.line_item_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_bulk_insert_is_rejected() {
        let store = InMemoryOrderStore::new();
        let err = store.bulk_insert_line_items(None, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyLineItems));
    }

    #[tokio::test]
    async fn test_line_items_require_an_order() {
        let store = InMemoryOrderStore::new();
        let err = store
            .bulk_insert_line_items(None, &[line(OrderId::new(42), 1, 1, 100)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownOrder(_)));
    }

    #[tokio::test]
    async fn test_one_order_per_cart() {
        let store = InMemoryOrderStore::new();
        let cart_id = CartId::new();
        store.create_order(None, &new_order(cart_id)).await.unwrap();

        let err = store.create_order(None, &new_order(cart_id)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrder(c) if c == cart_id));
    }

    #[tokio::test]
    async fn test_commit_rejects_concurrent_duplicate() {
        let store = InMemoryOrderStore::new();
        let cart_id = CartId::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        store.create_order(Some(&mut first), &new_order(cart_id)).await.unwrap();
        store.create_order(Some(&mut second), &new_order(cart_id)).await.unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateOrder(_)));
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_committed_writes() {
        let store = InMemoryOrderStore::new();
        let id = store.create_order(None, &new_order(CartId::new())).await.unwrap();
        store
            .bulk_insert_line_items(None, &[line(id, 7, 1, 300), line(id, 5, 2, 2000)])
            .await
            .unwrap();

        let items = store.line_items(id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id, ProductId::new(5));
    }
}
