//! PostgreSQL integration tests for the product store.
//!
//! One container is shared by every test; the table is truncated per test.

use std::sync::Arc;

use common::{Money, ProductId};
use product::{PostgresProductStore, ProductError, ProductStore};
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
            PostgresProductStore::new(temp_pool.clone())
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

async fn get_test_store() -> PostgresProductStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresProductStore::new(pool)
}

#[tokio::test]
#[serial]
async fn test_added_products_get_sequential_ids() {
    let store = get_test_store().await;

    let added = store
        .add_products(&[Money::from_cents(1000), Money::from_cents(300)])
        .await
        .unwrap();

    let ids: Vec<u64> = added.iter().map(|p| p.id.as_u64()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(added[0].price, Money::from_cents(1000));
    assert_eq!(added[1].price, Money::from_cents(300));
}

#[tokio::test]
#[serial]
async fn test_lookup_returns_known_products_in_id_order() {
    let store = get_test_store().await;
    let added = store
        .add_products(&[Money::from_cents(1000), Money::from_cents(300)])
        .await
        .unwrap();

    let found = store
        .list_by_ids(&[ProductId::new(2), ProductId::new(404), ProductId::new(1)])
        .await
        .unwrap();

    assert_eq!(found, added);
}

#[tokio::test]
#[serial]
async fn test_lookup_of_unknown_or_out_of_range_ids_is_empty() {
    let store = get_test_store().await;

    assert!(store.list_by_ids(&[ProductId::new(1)]).await.unwrap().is_empty());
    assert!(
        store
            .list_by_ids(&[ProductId::new(u64::MAX)])
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[serial]
async fn test_adding_nothing_is_rejected() {
    let store = get_test_store().await;
    assert!(matches!(
        store.add_products(&[]).await,
        Err(ProductError::Validation(_))
    ));
}
