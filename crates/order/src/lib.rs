//! Order service.
//!
//! Consumes create-order events (and the equivalent `POST /orders`), prices
//! the products, persists the order and its line items in one transaction
//! with at most one order per cart, and tells the cart service the order
//! number through the update-cart event.

pub mod carts;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod creator;
pub mod error;
pub mod model;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use carts::{CartGateway, CartServiceClient};
pub use catalog::{HttpProductCatalog, InMemoryProductCatalog, ProductCatalog};
pub use consumer::CreateOrderHandler;
pub use creator::{OrderCreator, OrderOutcome};
pub use error::{ApiError, OrderError, Result, StoreError};
pub use routes::orders::AppState;
pub use store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C, G>(
    state: Arc<AppState<S, C, G>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    S: OrderStore,
    C: ProductCatalog,
    G: CartGateway,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S, C, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
