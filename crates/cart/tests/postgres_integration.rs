//! PostgreSQL integration tests for the cart store.
//!
//! One container is shared by every test; tables are truncated per test.

use std::sync::Arc;

use cart::model::LineItem;
use cart::{CartError, CartStore, PostgresCartStore};
use common::{CartId, CartStatus, CartUpdate, OrderNumber};
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
            PostgresCartStore::new(temp_pool.clone())
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

async fn get_test_store() -> PostgresCartStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE cart_line_items, carts")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCartStore::new(pool)
}

async fn cart_with_items(store: &PostgresCartStore, items: &[(u64, u64)]) -> CartId {
    let cart_id = CartId::new();
    store.create_cart(cart_id).await.unwrap();
    for (product, quantity) in items {
        store
            .upsert_line_item(cart_id, LineItem::new(*product, *quantity))
            .await
            .unwrap();
    }
    cart_id
}

#[tokio::test]
#[serial]
async fn test_new_cart_is_open_and_empty() {
    let store = get_test_store().await;
    let cart_id = CartId::new();

    store.create_cart(cart_id).await.unwrap();

    let cart = store.get_cart(cart_id).await.unwrap().unwrap();
    assert!(cart.is_open());
    assert_eq!(cart.order_number, None);
    assert!(store.list_open_cart_items(cart_id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_upsert_replaces_quantity() {
    let store = get_test_store().await;
    let cart_id = cart_with_items(&store, &[(7, 1), (5, 2), (5, 4)]).await;

    let items = store.list_open_cart_items(cart_id).await.unwrap();

    assert_eq!(items, vec![LineItem::new(5, 4), LineItem::new(7, 1)]);
}

#[tokio::test]
#[serial]
async fn test_upsert_into_unknown_cart() {
    let store = get_test_store().await;
    let cart_id = CartId::new();

    let err = store
        .upsert_line_item(cart_id, LineItem::new(5, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, CartError::CartNotFound(id) if id == cart_id));
}

#[tokio::test]
#[serial]
async fn test_checked_out_cart_has_no_open_items() {
    let store = get_test_store().await;
    let processing = cart_with_items(&store, &[(5, 2)]).await;
    let created = cart_with_items(&store, &[(7, 1)]).await;

    store
        .update_cart(
            processing,
            &CartUpdate {
                status: CartStatus::OrderProcessing,
                order_number: None,
            },
        )
        .await
        .unwrap();
    store
        .update_cart(
            created,
            &CartUpdate {
                status: CartStatus::OrderCreated,
                order_number: Some(OrderNumber::new("20240131ABCDEFGH")),
            },
        )
        .await
        .unwrap();

    assert!(store.list_open_cart_items(processing).await.unwrap().is_empty());
    assert!(store.list_open_cart_items(created).await.unwrap().is_empty());

    let cart = store.get_cart(created).await.unwrap().unwrap();
    assert_eq!(cart.status, Some(CartStatus::OrderCreated));
    assert_eq!(
        cart.order_number.as_ref().map(|n| n.as_str()),
        Some("20240131ABCDEFGH")
    );
}

#[tokio::test]
#[serial]
async fn test_repeated_update_is_harmless() {
    let store = get_test_store().await;
    let cart_id = cart_with_items(&store, &[(5, 2)]).await;
    let update = CartUpdate {
        status: CartStatus::OrderCreated,
        order_number: Some(OrderNumber::new("20240131ABCDEFGH")),
    };

    store.update_cart(cart_id, &update).await.unwrap();
    store.update_cart(cart_id, &update).await.unwrap();

    let cart = store.get_cart(cart_id).await.unwrap().unwrap();
    assert_eq!(cart.status, Some(update.status));
    assert_eq!(cart.order_number, update.order_number);
}

#[tokio::test]
#[serial]
async fn test_update_of_unknown_cart_is_a_no_op() {
    let store = get_test_store().await;
    let cart_id = CartId::new();

    store
        .update_cart(
            cart_id,
            &CartUpdate {
                status: CartStatus::OrderCreated,
                order_number: None,
            },
        )
        .await
        .unwrap();

    assert!(store.get_cart(cart_id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_begin_checkout_is_won_once() {
    let store = get_test_store().await;
    let cart_id = cart_with_items(&store, &[(5, 2)]).await;

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.begin_checkout(cart_id).await.unwrap() })
        })
        .collect();
    let mut won = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            won += 1;
        }
    }

    assert_eq!(won, 1);
    let cart = store.get_cart(cart_id).await.unwrap().unwrap();
    assert_eq!(cart.status, Some(CartStatus::OrderProcessing));
    assert!(store.list_open_cart_items(cart_id).await.unwrap().is_empty());
    assert!(!store.begin_checkout(CartId::new()).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_oversized_quantity_is_rejected() {
    let store = get_test_store().await;
    let cart_id = CartId::new();
    store.create_cart(cart_id).await.unwrap();

    let err = store
        .upsert_line_item(cart_id, LineItem::new(5, u64::MAX))
        .await
        .unwrap_err();

    assert!(matches!(err, CartError::Validation(_)));
}
