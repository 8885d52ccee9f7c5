//! Order service error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{CartId, OrderId, ProductId};
use thiserror::Error;

/// Errors raised by order persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A bulk insert was called without rows.
    #[error("Bulk insert requires at least one line item")]
    EmptyLineItems,

    /// A line quantity does not fit the BIGINT column.
    #[error("Quantity {0} is out of range")]
    QuantityOutOfRange(u64),

    /// An order already exists for the cart.
    #[error("Order already exists for cart {0}")]
    DuplicateOrder(CartId),

    /// Line items reference an order that does not exist.
    #[error("Order not found: {0}")]
    UnknownOrder(OrderId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Errors raised while creating orders.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The catalog has no price for some requested products.
    #[error("Products not found: {0:?}")]
    ProductNotFound(Vec<ProductId>),

    /// The product service failed.
    #[error("Product service error: {0}")]
    Catalog(String),

    /// The cart service rejected an update.
    #[error("Cart service error: {0}")]
    CartService(String),

    /// Persistence failed; the transaction has been rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A broker error occurred.
    #[error("Broker error: {0}")]
    Broker(#[from] broker::BrokerError),

    /// An HTTP client error occurred.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        OrderError::Store(StoreError::Database(err))
    }
}

/// Result type for order persistence.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;

/// HTTP-facing error that maps to a status code and a `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!(error = %msg, "downstream service failed");
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(msg) => ApiError::BadRequest(msg),
            OrderError::ProductNotFound(_) => ApiError::NotFound(err.to_string()),
            OrderError::Catalog(_) | OrderError::Http(_) => ApiError::BadGateway(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
