//! Synchronous order creation endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{CartId, CreateOrderEvent, OrderedProduct};
use serde::{Deserialize, Serialize};

use crate::carts::CartGateway;
use crate::catalog::ProductCatalog;
use crate::creator::OrderCreator;
use crate::error::ApiError;
use crate::store::OrderStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S, C, G> {
    pub creator: Arc<OrderCreator<S, C, G>>,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(rename = "cartUUID")]
    pub cart_id: Option<String>,
    pub products: Option<Vec<ProductRequest>>,
}

#[derive(Deserialize)]
pub struct ProductRequest {
    #[serde(rename = "productID")]
    pub product_id: Option<u64>,
    #[serde(default)]
    pub quantity: u64,
}

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    #[serde(rename = "orderNumber")]
    pub order_number: String,
}

impl CreateOrderRequest {
    /// Checks required fields and converts to the wire event.
    pub fn validate(self) -> Result<CreateOrderEvent, ApiError> {
        let raw_cart_id = self
            .cart_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::BadRequest("cartUUID is required".to_string()))?;
        let cart_id = raw_cart_id
            .parse::<CartId>()
            .map_err(|e| ApiError::BadRequest(format!("Invalid cartUUID: {e}")))?;

        let products = self.products.unwrap_or_default();
        if products.is_empty() {
            return Err(ApiError::BadRequest("products is required".to_string()));
        }

        let products = products
            .into_iter()
            .enumerate()
            .map(|(i, p)| -> Result<OrderedProduct, ApiError> {
                let product_id = p.product_id.ok_or_else(|| {
                    ApiError::BadRequest(format!("products[{i}].productID is required"))
                })?;
                if p.quantity == 0 {
                    return Err(ApiError::BadRequest(format!(
                        "products[{i}].quantity must be greater than zero"
                    )));
                }
                if i64::try_from(p.quantity).is_err() {
                    return Err(ApiError::BadRequest(format!(
                        "products[{i}].quantity is too large"
                    )));
                }
                Ok(OrderedProduct::new(product_id, p.quantity))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CreateOrderEvent { cart_id, products })
    }
}

/// POST /orders: creates the order for a cart (idempotent per cart).
#[tracing::instrument(skip(state, req))]
pub async fn create<S, C, G>(
    State(state): State<Arc<AppState<S, C, G>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError>
where
    S: OrderStore,
    C: ProductCatalog,
    G: CartGateway,
{
    let event = req.validate()?;
    let outcome = state.creator.create_order(&event).await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_number: outcome.order().order_number.as_str().to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Result<CreateOrderEvent, ApiError> {
        serde_json::from_value::<CreateOrderRequest>(json)
            .unwrap()
            .validate()
    }

    #[test]
    fn test_valid_request() {
        let cart_id = CartId::new();
        let event = parse(serde_json::json!({
            "cartUUID": cart_id.to_string(),
            "products": [{"productID": 5, "quantity": 2}]
        }))
        .unwrap();
        assert_eq!(event.cart_id, cart_id);
        assert_eq!(event.products, vec![OrderedProduct::new(5, 2)]);
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let cart = CartId::new().to_string();
        let cases = [
            serde_json::json!({"products": [{"productID": 5, "quantity": 2}]}),
            serde_json::json!({"cartUUID": "", "products": [{"productID": 5, "quantity": 2}]}),
            serde_json::json!({"cartUUID": "nope", "products": [{"productID": 5, "quantity": 2}]}),
            serde_json::json!({"cartUUID": cart, "products": []}),
            serde_json::json!({"cartUUID": cart}),
            serde_json::json!({"cartUUID": cart, "products": [{"quantity": 2}]}),
            serde_json::json!({"cartUUID": cart, "products": [{"productID": 5, "quantity": 0}]}),
            serde_json::json!({"cartUUID": cart, "products": [{"productID": 5, "quantity": u64::MAX}]}),
        ];
        for case in cases {
            assert!(
                matches!(parse(case.clone()), Err(ApiError::BadRequest(_))),
                "{case} should be rejected"
            );
        }
    }
}
