//! Checkout saga entry points.
//!
//! Both paths read the open items of a cart first; an empty read means the
//! cart is unknown, empty or already checked out and fails with
//! [`CartError::NothingToCheckout`].
//!
//! - [`CheckoutCoordinator::checkout`] forwards the items to the order
//!   service and reports its outcome directly.
//! - [`CheckoutCoordinator::checkout_async`] moves the cart from open to
//!   `ORDER_PROCESSING` with a conditional write and only then publishes the
//!   create-order event. Concurrent requests race on that write and only the
//!   winner publishes. A crash between the write and the publish leaves the
//!   cart stuck in `ORDER_PROCESSING` instead of allowing a second checkout.

use common::{CartId, CreateOrderEvent, OrderedProduct};
use tracing::info;

use crate::error::{CartError, Result};
use crate::model::LineItem;
use crate::orders::OrderGateway;
use crate::store::CartStore;

/// Coordinates the cart side of the checkout saga.
pub struct CheckoutCoordinator<S, O> {
    store: S,
    orders: O,
}

impl<S: CartStore, O: OrderGateway> CheckoutCoordinator<S, O> {
    pub fn new(store: S, orders: O) -> Self {
        Self { store, orders }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Synchronous checkout through the order-creation HTTP contract.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, cart_id: CartId) -> Result<()> {
        let request = self.order_request(cart_id).await?;
        self.orders.create_order(&request).await?;

        metrics::counter!("cart_checkouts_total", "mode" => "sync").increment(1);
        info!(products = request.products.len(), "checkout completed");
        Ok(())
    }

    /// Asynchronous checkout through the create-order event.
    #[tracing::instrument(skip(self))]
    pub async fn checkout_async(&self, cart_id: CartId) -> Result<()> {
        let request = self.order_request(cart_id).await?;

        if !self.store.begin_checkout(cart_id).await? {
            info!("cart was checked out concurrently");
            return Err(CartError::NothingToCheckout(cart_id));
        }
        self.orders.create_order_async(&request).await?;

        metrics::counter!("cart_checkouts_total", "mode" => "async").increment(1);
        info!(products = request.products.len(), "checkout requested");
        Ok(())
    }

    async fn order_request(&self, cart_id: CartId) -> Result<CreateOrderEvent> {
        let items = self.store.list_open_cart_items(cart_id).await?;
        if items.is_empty() {
            return Err(CartError::NothingToCheckout(cart_id));
        }
        Ok(CreateOrderEvent {
            cart_id,
            products: items.into_iter().map(OrderedProduct::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use common::CartStatus;

    use super::*;
    use crate::store::InMemoryCartStore;

    /// Records requests and the cart status observed when each one arrives.
    #[derive(Clone, Default)]
    struct RecordingOrders {
        store: Option<InMemoryCartStore>,
        sync_calls: Arc<Mutex<Vec<CreateOrderEvent>>>,
        async_calls: Arc<Mutex<Vec<(CreateOrderEvent, Option<CartStatus>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl OrderGateway for RecordingOrders {
        async fn create_order(&self, request: &CreateOrderEvent) -> Result<()> {
            if self.fail {
                return Err(CartError::OrderService("503 Service Unavailable".into()));
            }
            self.sync_calls.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn create_order_async(&self, request: &CreateOrderEvent) -> Result<()> {
            let status = match &self.store {
                Some(store) => store
                    .get_cart(request.cart_id)
                    .await?
                    .and_then(|cart| cart.status),
                None => None,
            };
            self.async_calls
                .lock()
                .unwrap()
                .push((request.clone(), status));
            Ok(())
        }
    }

    async fn cart_with_items(store: &InMemoryCartStore) -> CartId {
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();
        store.upsert_line_item(cart_id, LineItem::new(5, 2)).await.unwrap();
        store.upsert_line_item(cart_id, LineItem::new(7, 1)).await.unwrap();
        cart_id
    }

    #[tokio::test]
    async fn test_sync_checkout_forwards_items() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders::default();
        let coordinator = CheckoutCoordinator::new(store.clone(), orders.clone());
        let cart_id = cart_with_items(&store).await;

        coordinator.checkout(cart_id).await.unwrap();

        let calls = orders.sync_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cart_id, cart_id);
        assert_eq!(
            calls[0].products,
            vec![OrderedProduct::new(5, 2), OrderedProduct::new(7, 1)]
        );
    }

    #[tokio::test]
    async fn test_empty_cart_cannot_be_checked_out() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders::default();
        let coordinator = CheckoutCoordinator::new(store.clone(), orders.clone());
        let cart_id = CartId::new();
        store.create_cart(cart_id).await.unwrap();

        let err = coordinator.checkout(cart_id).await.unwrap_err();
        assert!(matches!(err, CartError::NothingToCheckout(_)));
        let err = coordinator.checkout_async(cart_id).await.unwrap_err();
        assert!(matches!(err, CartError::NothingToCheckout(_)));
        assert!(orders.sync_calls.lock().unwrap().is_empty());
        assert!(orders.async_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_checkout_surfaces_order_service_failure() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders {
            fail: true,
            ..Default::default()
        };
        let coordinator = CheckoutCoordinator::new(store.clone(), orders);
        let cart_id = cart_with_items(&store).await;

        let err = coordinator.checkout(cart_id).await.unwrap_err();
        assert!(matches!(err, CartError::OrderService(_)));
        let cart = store.get_cart(cart_id).await.unwrap().unwrap();
        assert!(cart.is_open());
    }

    #[tokio::test]
    async fn test_async_checkout_writes_status_before_publishing() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders {
            store: Some(store.clone()),
            ..Default::default()
        };
        let coordinator = CheckoutCoordinator::new(store.clone(), orders.clone());
        let cart_id = cart_with_items(&store).await;

        coordinator.checkout_async(cart_id).await.unwrap();

        let calls = orders.async_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Some(CartStatus::OrderProcessing));
    }

    #[tokio::test]
    async fn test_second_async_checkout_is_rejected() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders::default();
        let coordinator = CheckoutCoordinator::new(store.clone(), orders.clone());
        let cart_id = cart_with_items(&store).await;

        coordinator.checkout_async(cart_id).await.unwrap();
        let err = coordinator.checkout_async(cart_id).await.unwrap_err();

        assert!(matches!(err, CartError::NothingToCheckout(_)));
        assert_eq!(orders.async_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_status_write_publishes_nothing() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders::default();
        let coordinator = CheckoutCoordinator::new(store.clone(), orders.clone());
        let cart_id = cart_with_items(&store).await;
        store.set_fail_on_update(true).await;

        assert!(coordinator.checkout_async(cart_id).await.is_err());
        assert!(orders.async_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_async_checkouts_publish_once() {
        let store = InMemoryCartStore::new();
        let orders = RecordingOrders::default();
        let coordinator = Arc::new(CheckoutCoordinator::new(store.clone(), orders.clone()));
        let cart_id = cart_with_items(&store).await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.checkout_async(cart_id).await })
            })
            .collect();
        let mut succeeded = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(e) => assert!(matches!(e, CartError::NothingToCheckout(_))),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(orders.async_calls.lock().unwrap().len(), 1);
        let cart = store.get_cart(cart_id).await.unwrap().unwrap();
        assert_eq!(cart.status, Some(CartStatus::OrderProcessing));
    }
}
