//! User service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::UserId;
use domain::{NewUser, User, UserStore};
use resilience::Transport;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/users: register a user.
#[tracing::instrument(skip(state, req), fields(email = %req.email))]
pub async fn create<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.users.insert(req).await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/{id}
#[tracing::instrument(skip(state))]
pub async fn get<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id: UserId = parse_id(&id, "user")?;
    state
        .users
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

/// GET /api/users
#[tracing::instrument(skip(state))]
pub async fn list<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.users.list().await?))
}
