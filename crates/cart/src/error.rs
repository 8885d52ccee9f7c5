//! Cart service error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::CartId;
use thiserror::Error;

/// Errors raised by cart persistence and the checkout saga.
#[derive(Debug, Error)]
pub enum CartError {
    /// The cart does not exist.
    #[error("Cart not found: {0}")]
    CartNotFound(CartId),

    /// The cart has no items or has already been checked out.
    #[error("Products in cart '{0}' not found or already checked out")]
    NothingToCheckout(CartId),

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The order service rejected or failed the order creation request.
    #[error("Order service error: {0}")]
    OrderService(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

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

/// Result type for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;

/// HTTP-facing error that maps to a status code and a `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// A downstream service failed.
    BadGateway(String),
    /// Internal server error.
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

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::CartNotFound(_) | CartError::NothingToCheckout(_) => {
                ApiError::NotFound(err.to_string())
            }
            CartError::Validation(msg) => ApiError::BadRequest(msg),
            CartError::OrderService(_) | CartError::Http(_) => ApiError::BadGateway(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
