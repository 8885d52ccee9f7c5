//! Cart endpoints and checkout triggers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CartId, CartStatus, CartUpdate, OrderNumber};
use serde::{Deserialize, Serialize};

use crate::checkout::CheckoutCoordinator;
use crate::error::ApiError;
use crate::model::LineItem;
use crate::orders::OrderGateway;
use crate::store::CartStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S, O> {
    pub store: S,
    pub checkout: CheckoutCoordinator<S, O>,
}

impl<S: CartStore + Clone, O: OrderGateway> AppState<S, O> {
    pub fn new(store: S, orders: O) -> Self {
        Self {
            checkout: CheckoutCoordinator::new(store.clone(), orders),
            store,
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct AddProductRequest {
    #[serde(rename = "productID")]
    pub product_id: Option<u64>,
    pub quantity: Option<u64>,
}

#[derive(Deserialize)]
pub struct UpdateCartRequest {
    pub status: Option<String>,
    #[serde(rename = "orderNumber")]
    pub order_number: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartCreatedResponse {
    #[serde(rename = "cartUUID")]
    pub cart_id: CartId,
}

// -- Handlers --

/// POST /carts
#[tracing::instrument(skip(state))]
pub async fn create<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
) -> Result<(StatusCode, Json<CartCreatedResponse>), ApiError> {
    let cart_id = CartId::new();
    state.store.create_cart(cart_id).await?;
    metrics::counter!("carts_created_total").increment(1);
    Ok((StatusCode::CREATED, Json(CartCreatedResponse { cart_id })))
}

/// GET /carts/{uuid}/products
#[tracing::instrument(skip(state))]
pub async fn list_products<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LineItem>>, ApiError> {
    let cart_id = parse_cart_id(&id)?;
    let items = state.store.list_open_cart_items(cart_id).await?;
    if items.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Products in cart '{cart_id}' not found"
        )));
    }
    Ok(Json(items))
}

/// POST /carts/{uuid}/product: adds a product or replaces its quantity.
#[tracing::instrument(skip(state, req))]
pub async fn add_product<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
    Path(id): Path<String>,
    Json(req): Json<AddProductRequest>,
) -> Result<StatusCode, ApiError> {
    let cart_id = parse_cart_id(&id)?;
    let product_id = req
        .product_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest("productID is required".to_string()))?;
    let quantity = req
        .quantity
        .filter(|q| *q > 0)
        .ok_or_else(|| ApiError::BadRequest("quantity must be greater than zero".to_string()))?;
    if i64::try_from(quantity).is_err() {
        return Err(ApiError::BadRequest("quantity is too large".to_string()));
    }

    state
        .store
        .upsert_line_item(cart_id, LineItem::new(product_id, quantity))
        .await?;
    Ok(StatusCode::CREATED)
}

/// POST /carts/{uuid}/checkout
#[tracing::instrument(skip(state))]
pub async fn checkout<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cart_id = parse_cart_id(&id)?;
    state.checkout.checkout(cart_id).await?;
    Ok(StatusCode::CREATED)
}

/// POST /carts/{uuid}/checkout-with-async
#[tracing::instrument(skip(state))]
pub async fn checkout_async<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cart_id = parse_cart_id(&id)?;
    state.checkout.checkout_async(cart_id).await?;
    Ok(StatusCode::CREATED)
}

/// PATCH /carts/{uuid}: writes status and order number.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: CartStore + Clone, O: OrderGateway>(
    State(state): State<Arc<AppState<S, O>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<StatusCode, ApiError> {
    let cart_id = parse_cart_id(&id)?;
    let status = req
        .status
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("status is required".to_string()))?
        .parse::<CartStatus>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let update = CartUpdate {
        status,
        order_number: req.order_number.map(OrderNumber::from),
    };
    state.store.update_cart(cart_id, &update).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_cart_id(id: &str) -> Result<CartId, ApiError> {
    id.parse::<CartId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid cart id '{id}': {e}")))
}
