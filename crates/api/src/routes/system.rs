//! Health and metrics endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::{CircuitState, Transport};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Breaker state per downstream dependency.
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

#[derive(Serialize)]
pub struct DependencyHealth {
    pub state: CircuitState,
    pub failure_count: u32,
}

/// GET /health: the process is up. Open breakers are reported, not treated
/// as unhealthy. Each state is the one the next call would see, so a breaker
/// whose cooldown has elapsed shows as half-open.
pub async fn health<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
) -> Json<HealthResponse> {
    let registry = state.orchestrator.client().registry();
    let dependencies = registry
        .names()
        .filter_map(|name| {
            let snapshot = registry.breaker(name)?.snapshot();
            Some((
                name.to_string(),
                DependencyHealth {
                    state: snapshot.state,
                    failure_count: snapshot.failure_count,
                },
            ))
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        dependencies,
    })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
