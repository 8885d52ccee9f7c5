use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{CartId, CartStatus, CartUpdate, ProductId};
use tokio::sync::RwLock;

use super::CartStore;
use crate::error::{CartError, Result};
use crate::model::{Cart, LineItem};

#[derive(Default)]
struct State {
    carts: HashMap<CartId, Cart>,
    items: HashMap<CartId, BTreeMap<ProductId, u64>>,
}

/// In-memory cart store for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<RwLock<State>>,
    fail_updates: Arc<RwLock<bool>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `update_cart` fail with a database error.
    pub async fn set_fail_on_update(&self, fail: bool) {
        *self.fail_updates.write().await = fail;
    }

    /// Returns every line item of a cart regardless of its status.
    pub async fn line_items(&self, cart_id: CartId) -> Vec<LineItem> {
        self.state
            .read()
            .await
            .items
            .get(&cart_id)
            .map(|items| {
                items
                    .iter()
                    .map(|(product_id, quantity)| LineItem::new(*product_id, *quantity))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn create_cart(&self, cart_id: CartId) -> Result<()> {
        self.state
            .write()
            .await
            .carts
            .entry(cart_id)
            .or_insert_with(|| Cart::open(cart_id));
        Ok(())
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&cart_id).cloned())
    }

    async fn upsert_line_item(&self, cart_id: CartId, item: LineItem) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.carts.contains_key(&cart_id) {
            return Err(CartError::CartNotFound(cart_id));
        }
        state
            .items
            .entry(cart_id)
            .or_default()
            .insert(item.product_id, item.quantity);
        Ok(())
    }

    async fn list_open_cart_items(&self, cart_id: CartId) -> Result<Vec<LineItem>> {
        let open = self
            .state
            .read()
            .await
            .carts
            .get(&cart_id)
            .is_some_and(Cart::is_open);
        if !open {
            return Ok(Vec::new());
        }
        Ok(self.line_items(cart_id).await)
    }

    async fn begin_checkout(&self, cart_id: CartId) -> Result<bool> {
        if *self.fail_updates.read().await {
            return Err(CartError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.write().await;
        match state.carts.get_mut(&cart_id) {
            Some(cart) if cart.is_open() => {
                cart.status = Some(CartStatus::OrderProcessing);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_cart(&self, cart_id: CartId, update: &CartUpdate) -> Result<()> {
        if *self.fail_updates.read().await {
            return Err(CartError::Database(sqlx::Error::PoolTimedOut));
        }
        if let Some(cart) = self.state.write().await.carts.get_mut(&cart_id) {
            cart.status = Some(update.status);
            cart.order_number = update.order_number.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderNumber;

    #[tokio::test]
    async fn test_upsert_replaces_quantity() {
        let store = InMemoryCartStore::new();
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();

        store.upsert_line_item(cart_id, LineItem::new(5, 2)).await.unwrap();
        store.upsert_line_item(cart_id, LineItem::new(5, 7)).await.unwrap();

        let items = store.list_open_cart_items(cart_id).await.unwrap();
        assert_eq!(items, vec![LineItem::new(5, 7)]);
    }

    #[tokio::test]
    async fn test_upsert_into_unknown_cart_fails() {
        let store = InMemoryCartStore::new();
        let err = store
            .upsert_line_item(CartId::new(), LineItem::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::CartNotFound(_)));
    }

    #[tokio::test]
    async fn test_checked_out_cart_lists_nothing() {
        let store = InMemoryCartStore::new();
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();
        store.upsert_line_item(cart_id, LineItem::new(1, 1)).await.unwrap();

        store
            .update_cart(
                cart_id,
                &CartUpdate {
                    status: CartStatus::OrderProcessing,
                    order_number: None,
                },
            )
            .await
            .unwrap();

        assert!(store.list_open_cart_items(cart_id).await.unwrap().is_empty());
        assert!(store.list_open_cart_items(CartId::new()).await.unwrap().is_empty());
        assert_eq!(store.line_items(cart_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_checkout_succeeds_once() {
        let store = InMemoryCartStore::new();
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();

        assert!(store.begin_checkout(cart_id).await.unwrap());
        assert!(!store.begin_checkout(cart_id).await.unwrap());
        assert!(!store.begin_checkout(CartId::new()).await.unwrap());

        let cart = store.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.status, Some(CartStatus::OrderProcessing));
    }

    #[tokio::test]
    async fn test_update_is_repeatable() {
        let store = InMemoryCartStore::new();
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();
        let update = CartUpdate {
            status: CartStatus::OrderCreated,
            order_number: Some(OrderNumber::new("20240131ABCDEFGH")),
        };

        store.update_cart(cart_id, &update).await.unwrap();
        store.update_cart(cart_id, &update).await.unwrap();
        store.update_cart(CartId::new(), &update).await.unwrap();

        let cart = store.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.status, Some(CartStatus::OrderCreated));
        assert_eq!(cart.order_number, update.order_number);
    }
}
