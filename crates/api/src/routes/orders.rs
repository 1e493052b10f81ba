//! Order service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId, UserId};
use domain::{Order, OrderStore};
use resilience::Transport;
use serde::Deserialize;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// POST /api/orders: validate against the user and product services, commit
/// and announce. Stock is decremented later by the inventory consumer.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id, product_id = %req.product_id))]
pub async fn create<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .orchestrator
        .create_order(req.user_id, req.product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    state
        .orders()
        .get(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}

/// GET /api/orders
#[tracing::instrument(skip(state))]
pub async fn list<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders().list().await?))
}
