//! Product lookup and seeding endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{Money, ProductId};
use serde::Deserialize;

use crate::error::{ApiError, ProductError};
use crate::model::ProductResponse;
use crate::store::ProductStore;

/// Shared state for the product routes.
pub struct AppState<S> {
    pub store: S,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub ids: Option<String>,
}

/// Parses `1,2,3` into product ids.
fn parse_ids(raw: Option<&str>) -> Result<Vec<ProductId>, ApiError> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("ids is required".to_string()))?;
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map(ProductId::new)
                .map_err(|e| ApiError::BadRequest(format!("invalid product id '{part}': {e}")))
        })
        .collect()
}

/// GET /products?ids=1,2,3: the products that exist, 404 when none does.
#[tracing::instrument(skip(state))]
pub async fn list<S: ProductStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let ids = parse_ids(query.ids.as_deref())?;
    let products = state.store.list_by_ids(&ids).await?;
    if products.is_empty() {
        metrics::counter!("product_lookup_misses_total").increment(1);
        return Err(ProductError::NotFound.into());
    }
    metrics::counter!("product_lookups_total").increment(1);
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct NewProductRequest {
    pub price: Option<f64>,
}

/// POST /products: adds one product per entry, `[{"price": 10.0}]`.
#[tracing::instrument(skip(state, req), fields(count = req.len()))]
pub async fn add<S: ProductStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<Vec<NewProductRequest>>,
) -> Result<(StatusCode, Json<Vec<ProductResponse>>), ApiError> {
    if req.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one product is required".to_string(),
        ));
    }
    let prices = req
        .iter()
        .enumerate()
        .map(|(i, p)| match p.price {
            Some(price) if price.is_finite() && price >= 0.0 => Ok(Money::from_decimal(price)),
            _ => Err(ApiError::BadRequest(format!(
                "[{i}].price must be a non-negative number"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let products = state.store.add_products(&prices).await?;
    Ok((
        StatusCode::CREATED,
        Json(products.into_iter().map(ProductResponse::from).collect()),
    ))
}
