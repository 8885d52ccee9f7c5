//! Cart service.
//!
//! Owns carts and their line items, starts the checkout saga (synchronously
//! through the order service's HTTP contract or asynchronously through the
//! create-order event) and applies the update-cart events that close it.

pub mod checkout;
pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod orders;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use checkout::CheckoutCoordinator;
pub use consumer::UpdateCartHandler;
pub use error::{ApiError, CartError, Result};
pub use orders::{OrderGateway, OrderServiceClient};
pub use routes::carts::AppState;
pub use store::{CartStore, InMemoryCartStore, PostgresCartStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, O>(state: Arc<AppState<S, O>>, metrics_handle: PrometheusHandle) -> Router
where
    S: CartStore + Clone,
    O: OrderGateway,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/carts", post(routes::carts::create::<S, O>))
        .route("/carts/{id}", patch(routes::carts::update::<S, O>))
        .route(
            "/carts/{id}/products",
            get(routes::carts::list_products::<S, O>),
        )
        .route("/carts/{id}/product", post(routes::carts::add_product::<S, O>))
        .route("/carts/{id}/checkout", post(routes::carts::checkout::<S, O>))
        .route(
            "/carts/{id}/checkout-with-async",
            post(routes::carts::checkout_async::<S, O>),
        )
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
