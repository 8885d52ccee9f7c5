//! Product service.
//!
//! Serves unit prices to the order service: `GET /products?ids=1,2,3`
//! returns `[{id, price}]` for the products that exist and 404 when none
//! does. `POST /products` seeds the catalog.

pub mod config;
pub mod error;
pub mod model;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ProductError, Result};
pub use model::Product;
pub use routes::products::AppState;
pub use store::{InMemoryProductStore, PostgresProductStore, ProductStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ProductStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/products",
            get(routes::products::list::<S>).post(routes::products::add::<S>),
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
