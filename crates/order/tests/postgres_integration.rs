//! PostgreSQL integration tests for the order store.
//!
//! These tests share one PostgreSQL container and truncate the tables
//! before each test, so they run serially.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{
    CartId, CartUpdate, CreateOrderEvent, Money, OrderId, OrderNumber, OrderedProduct, ProductId,
    UpdateCartEvent,
};
use order::model::{NewOrder, OrderLineItem};
use order::{
    CartGateway, InMemoryProductCatalog, OrderCreator, OrderStore, PostgresOrderStore, StoreError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresOrderStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_line_items, orders RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn new_order(cart_id: CartId) -> NewOrder {
    NewOrder {
        order_number: OrderNumber::generate(),
        cart_id,
        amount: Money::from_decimal(23.0),
    }
}

fn line(order_id: OrderId, product: u64, quantity: u64, amount: f64) -> OrderLineItem {
    OrderLineItem {
        order_id,
        product_id: ProductId::new(product),
        quantity,
        amount: Money::from_decimal(amount),
    }
}

async fn order_count(store: &PostgresOrderStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

async fn line_item_count(store: &PostgresOrderStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM order_line_items")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_order_and_line_items_commit_together() {
    let store = get_test_store().await;
    let cart_id = CartId::new();

    let mut tx = store.begin().await.unwrap();
    let id = store.create_order(Some(&mut tx), &new_order(cart_id)).await.unwrap();
    store
        .bulk_insert_line_items(Some(&mut tx), &[line(id, 7, 1, 3.0), line(id, 5, 2, 20.0)])
        .await
        .unwrap();
    assert!(store.find_by_cart(None, cart_id).await.unwrap().is_none());
    store.commit(tx).await.unwrap();

    let order = store.find_by_cart(None, cart_id).await.unwrap().unwrap();
    assert_eq!(order.id, id);
    assert_eq!(order.amount, Money::from_decimal(23.0));

    let items = store.line_items(id).await.unwrap();
    assert_eq!(items, vec![line(id, 5, 2, 20.0), line(id, 7, 1, 3.0)]);
}

#[tokio::test]
#[serial]
async fn test_failed_line_items_roll_back_the_order() {
    let store = get_test_store().await;
    let cart_id = CartId::new();

    let mut tx = store.begin().await.unwrap();
    let id = store.create_order(Some(&mut tx), &new_order(cart_id)).await.unwrap();
    // quantity 0 violates the CHECK constraint
    let result = store
        .bulk_insert_line_items(Some(&mut tx), &[line(id, 5, 2, 20.0), line(id, 7, 0, 0.0)])
        .await;
    assert!(matches!(result, Err(StoreError::Database(_))));
    store.rollback(tx).await.unwrap();

    assert!(store.find_by_cart(None, cart_id).await.unwrap().is_none());
    assert_eq!(order_count(&store).await, 0);
    assert_eq!(line_item_count(&store).await, 0);
}

#[tokio::test]
#[serial]
async fn test_second_order_for_cart_is_rejected() {
    let store = get_test_store().await;
    let cart_id = CartId::new();
    store.create_order(None, &new_order(cart_id)).await.unwrap();

    let err = store.create_order(None, &new_order(cart_id)).await.unwrap_err();

    assert!(matches!(err, StoreError::DuplicateOrder(c) if c == cart_id));
    assert_eq!(order_count(&store).await, 1);
}

#[tokio::test]
#[serial]
async fn test_empty_bulk_insert_is_rejected() {
    let store = get_test_store().await;
    let err = store.bulk_insert_line_items(None, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::EmptyLineItems));
}

#[tokio::test]
#[serial]
async fn test_line_items_for_unknown_order() {
    let store = get_test_store().await;
    let err = store
        .bulk_insert_line_items(None, &[line(OrderId::new(4242), 5, 1, 10.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownOrder(_)));
}

#[derive(Clone, Default)]
struct RecordingCarts {
    events: Arc<Mutex<Vec<UpdateCartEvent>>>,
}

#[async_trait]
impl CartGateway for RecordingCarts {
    async fn update_cart(&self, _cart_id: CartId, _update: &CartUpdate) -> order::Result<()> {
        Ok(())
    }

    async fn update_cart_async(&self, event: &UpdateCartEvent) -> order::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
#[serial]
async fn test_redelivered_event_creates_one_order() {
    let store = get_test_store().await;
    let carts = RecordingCarts::default();
    let catalog = InMemoryProductCatalog::new()
        .with_product(5, Money::from_decimal(10.0))
        .with_product(7, Money::from_decimal(3.0));
    let creator = OrderCreator::new(store.clone(), catalog, carts.clone());
    let event = CreateOrderEvent {
        cart_id: CartId::new(),
        products: vec![OrderedProduct::new(5, 2), OrderedProduct::new(7, 1)],
    };

    let first = creator.create_order(&event).await.unwrap();
    let second = creator.create_order(&event).await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.order().id, second.order().id);
    assert_eq!(order_count(&store).await, 1);
    assert_eq!(line_item_count(&store).await, 2);

    let events = carts.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], events[1]);
}
