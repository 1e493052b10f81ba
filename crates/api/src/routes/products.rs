//! Product service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::{NewProduct, Product, ProductStore};
use resilience::Transport;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/products: add a product with its initial stock.
#[tracing::instrument(skip(state, req), fields(name = %req.name))]
pub async fn create<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Json(req): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    if req.price.is_negative() {
        return Err(ApiError::BadRequest(
            "Price must not be negative".to_string(),
        ));
    }
    let product = state.products.insert(req).await?;
    tracing::info!(product_id = %product.id, stock = product.stock, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /api/products/{id}
#[tracing::instrument(skip(state))]
pub async fn get<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let id: ProductId = parse_id(&id, "product")?;
    state
        .products
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))
}

/// GET /api/products
#[tracing::instrument(skip(state))]
pub async fn list<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.products.list().await?))
}
