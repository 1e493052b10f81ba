//! HTTP API hosting the user, product and order services in one process.
//!
//! Orders are validated against users and products over HTTP through the
//! resilient client, then announced on the message broker. The inventory
//! consumer runs alongside the server and applies stock changes.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use domain::{InMemoryOrderStore, InMemoryProductStore, InMemoryUserStore};
use inventory::{ConsumerHandle, InventoryConsumer};
use messaging::InMemoryBroker;
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::{ResilientClient, Transport};
use saga::{EventPublisher, OrderOrchestrator};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::{AppState, Orchestrator};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<T: Transport + 'static>(
    state: Arc<AppState<T>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<T>))
        .route(
            "/api/orders",
            get(routes::orders::list::<T>).post(routes::orders::create::<T>),
        )
        .route("/api/orders/{id}", get(routes::orders::get::<T>))
        .route(
            "/api/products",
            get(routes::products::list::<T>).post(routes::products::create::<T>),
        )
        .route("/api/products/{id}", get(routes::products::get::<T>))
        .route(
            "/api/users",
            get(routes::users::list::<T>).post(routes::users::create::<T>),
        )
        .route("/api/users/{id}", get(routes::users::get::<T>))
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

/// Creates empty stores and an orchestrator wired to `transport` and `broker`.
pub fn create_default_state<T: Transport + 'static>(
    config: &Config,
    transport: T,
    broker: InMemoryBroker,
) -> Arc<AppState<T>> {
    let client = ResilientClient::new(transport, config.registry());
    let publisher = EventPublisher::new(broker, config.consumer.topic.clone());
    let orchestrator = OrderOrchestrator::new(InMemoryOrderStore::new(), client, publisher)
        .with_publish_timeout(config.publish_timeout);

    Arc::new(AppState {
        users: InMemoryUserStore::new(),
        products: InMemoryProductStore::new(),
        orchestrator,
    })
}

/// Starts the inventory consumer against the state's product store.
pub fn start_consumer<T: Transport>(
    config: &Config,
    state: &AppState<T>,
    broker: InMemoryBroker,
) -> ConsumerHandle {
    InventoryConsumer::new(broker, state.products.clone(), config.consumer.clone()).start()
}
