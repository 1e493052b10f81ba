//! Order placement saga.
//!
//! Placement runs these steps in order, stopping at the first failure:
//! 1. Validate the user with the user service
//! 2. Fetch price and stock from the product service
//! 3. Check the requested quantity against stock
//! 4. Commit the order locally
//! 5. Publish `ORDER_CREATED` (best effort)
//!
//! Stock is never touched here. The inventory consumer decrements it when
//! the event arrives.

use std::time::Duration;

use common::{ProductId, UserId};
use domain::{Money, NewOrder, Order, OrderEvent, OrderStore};
use messaging::Broker;
use resilience::{CallOutcome, Request, ResilientClient, Transport};
use serde::Deserialize;
use serde::de::IgnoredAny;
use tokio::time::Instant;

use crate::error::{PlacementError, PublishError, Result};
use crate::publisher::EventPublisher;

/// Dependency name of the user service in the registry.
pub const USER_SERVICE: &str = "users";

/// Dependency name of the product service in the registry.
pub const PRODUCT_SERVICE: &str = "products";

/// Default upper bound on the publish step.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ProductSnapshot {
    price: Money,
    stock: u32,
}

/// Places orders across the user, product and order services.
pub struct OrderOrchestrator<O, T, B>
where
    O: OrderStore,
    T: Transport,
    B: Broker,
{
    orders: O,
    client: ResilientClient<T>,
    publisher: EventPublisher<B>,
    publish_timeout: Duration,
}

impl<O, T, B> OrderOrchestrator<O, T, B>
where
    O: OrderStore,
    T: Transport,
    B: Broker,
{
    /// Creates an orchestrator.
    ///
    /// `client` must have [`USER_SERVICE`] and [`PRODUCT_SERVICE`] registered.
    pub fn new(orders: O, client: ResilientClient<T>, publisher: EventPublisher<B>) -> Self {
        Self {
            orders,
            client,
            publisher,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Sets the upper bound on the publish step.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn client(&self) -> &ResilientClient<T> {
        &self.client
    }

    pub fn publisher(&self) -> &EventPublisher<B> {
        &self.publisher
    }

    /// Validates and commits a new order, then announces it.
    ///
    /// A publish failure is logged and does not fail the call: the order is
    /// already committed by then.
    #[tracing::instrument(skip(self, user_id, product_id), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Order> {
        let started = Instant::now();
        let result = self.place(user_id, product_id, quantity).await;

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(order_id = %order.id, total_price = %order.total_price, "order created");
            }
            Err(e) => {
                metrics::counter!("orders_rejected_total", "category" => e.category().as_str())
                    .increment(1);
                tracing::warn!(error = %e, category = e.category().as_str(), "order rejected");
            }
        }
        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn place(&self, user_id: UserId, product_id: ProductId, quantity: u32) -> Result<Order> {
        if quantity == 0 {
            return Err(PlacementError::InvalidQuantity);
        }

        self.validate_user(user_id).await?;
        let product = self.fetch_product(product_id).await?;

        if quantity > product.stock {
            return Err(PlacementError::InsufficientStock {
                product_id,
                available: product.stock,
                requested: quantity,
            });
        }

        let order = self
            .orders
            .insert(NewOrder {
                user_id,
                product_id,
                quantity,
                total_price: product.price.multiply(quantity),
            })
            .await?;

        self.announce(&order).await;
        Ok(order)
    }

    async fn validate_user(&self, user_id: UserId) -> Result<()> {
        let outcome = self
            .client
            .send(USER_SERVICE, &Request::get(user_id.to_string()))
            .await
            .decode::<IgnoredAny>(USER_SERVICE);

        match outcome {
            CallOutcome::Success { .. } => Ok(()),
            CallOutcome::TerminalFailure(failure) if failure.is_not_found() => {
                Err(PlacementError::UserNotFound(user_id))
            }
            CallOutcome::RetryableFailure(failure) | CallOutcome::TerminalFailure(failure) => {
                Err(PlacementError::Unavailable {
                    service: "User",
                    failure,
                })
            }
        }
    }

    async fn fetch_product(&self, product_id: ProductId) -> Result<ProductSnapshot> {
        let outcome = self
            .client
            .send(PRODUCT_SERVICE, &Request::get(product_id.to_string()))
            .await
            .decode::<ProductSnapshot>(PRODUCT_SERVICE);

        match outcome {
            CallOutcome::Success { payload, .. } => Ok(payload),
            CallOutcome::TerminalFailure(failure) if failure.is_not_found() => {
                Err(PlacementError::ProductNotFound(product_id))
            }
            CallOutcome::RetryableFailure(failure) | CallOutcome::TerminalFailure(failure) => {
                Err(PlacementError::Unavailable {
                    service: "Product",
                    failure,
                })
            }
        }
    }

    async fn announce(&self, order: &Order) {
        let event = OrderEvent::order_created(order);
        let result = tokio::time::timeout(self.publish_timeout, self.publisher.publish(&event))
            .await
            .unwrap_or(Err(PublishError::Timeout));

        if let Err(e) = result {
            if matches!(e, PublishError::Timeout) {
                metrics::counter!("order_events_publish_failures_total").increment(1);
            }
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "order committed but its event was not published"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{InMemoryOrderStore, OrderStatus};
    use messaging::{InMemoryBroker, QueueSpec, TopicSpec};
    use resilience::{
        BackoffPolicy, CallConfig, DependencyConfig, DependencyRegistry, RawResponse,
        StubTransport, TransportError,
    };

    type Scripted = std::result::Result<RawResponse, TransportError>;

    fn fast() -> DependencyConfig {
        DependencyConfig {
            call: CallConfig {
                timeout: Duration::from_millis(200),
                max_attempts: 3,
                backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4)),
            },
            ..DependencyConfig::new("http://services.test")
        }
    }

    fn user() -> Scripted {
        Ok(RawResponse::new(200, r#"{"id":1,"name":"Ada","email":"ada@example.com"}"#))
    }

    fn product(price: i64, stock: u32) -> Scripted {
        Ok(RawResponse::new(
            200,
            format!(r#"{{"id":5,"name":"Widget","price":{price},"stock":{stock}}}"#),
        ))
    }

    fn not_found() -> Scripted {
        Ok(RawResponse::new(404, r#"{"error":"not found"}"#))
    }

    fn refused() -> Scripted {
        Err(TransportError::Connect("connection refused".to_string()))
    }

    struct Harness {
        orchestrator: OrderOrchestrator<InMemoryOrderStore, StubTransport, InMemoryBroker>,
        orders: InMemoryOrderStore,
        broker: InMemoryBroker,
    }

    async fn harness(script: Vec<Scripted>, fallback: Scripted) -> Harness {
        let orders = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_topic(&TopicSpec::durable("order.events"))
            .await
            .unwrap();
        conn.declare_queue(&QueueSpec::durable("watcher")).await.unwrap();
        conn.bind("watcher", "order.events").await.unwrap();
        conn.close().await.unwrap();

        let registry = DependencyRegistry::new()
            .with(USER_SERVICE, fast())
            .with(PRODUCT_SERVICE, fast());
        let client = ResilientClient::new(StubTransport::new(fallback).with_script(script), registry);
        let orchestrator = OrderOrchestrator::new(
            orders.clone(),
            client,
            EventPublisher::new(broker.clone(), "order.events"),
        );
        Harness {
            orchestrator,
            orders,
            broker,
        }
    }

    #[tokio::test]
    async fn commits_order_with_total_price_and_publishes() {
        let h = harness(vec![user(), product(999, 100)], refused()).await;

        let order = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 3)
            .await
            .unwrap();

        assert_eq!(order.total_price, Money::from_cents(2997));
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(h.orders.len().await, 1);
        assert_eq!(h.broker.queue_depth("watcher"), 1);
        assert_eq!(
            h.orchestrator.client().transport().urls(),
            vec!["http://services.test/1", "http://services.test/5"]
        );
    }

    #[tokio::test]
    async fn missing_user_skips_product_lookup() {
        let h = harness(vec![not_found()], product(100, 10)).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(9), ProductId::new(5), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, PlacementError::UserNotFound(_)));
        assert_eq!(h.orchestrator.client().transport().calls(), 1);
        assert!(h.orders.is_empty().await);
    }

    #[tokio::test]
    async fn missing_product_is_a_client_error() {
        let h = harness(vec![user(), not_found()], refused()).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(42), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, PlacementError::ProductNotFound(_)));
        assert_eq!(err.category(), crate::ErrorCategory::Client);
    }

    #[tokio::test]
    async fn insufficient_stock_rejects_before_commit() {
        let h = harness(vec![user(), product(100, 5)], refused()).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 10)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::InsufficientStock {
                available: 5,
                requested: 10,
                ..
            }
        ));
        assert!(h.orders.is_empty().await);
        assert_eq!(h.broker.queue_depth("watcher"), 0);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_without_calls() {
        let h = harness(Vec::new(), user()).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, PlacementError::InvalidQuantity));
        assert_eq!(h.orchestrator.client().transport().calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_are_unavailable() {
        let h = harness(Vec::new(), refused()).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 1)
            .await
            .unwrap_err();

        assert_eq!(err.category(), crate::ErrorCategory::Unavailable);
        assert_eq!(err.to_string(), "User service unavailable");
        assert_eq!(h.orchestrator.client().transport().calls(), 3);
    }

    #[tokio::test]
    async fn product_server_error_is_unavailable() {
        let h = harness(
            vec![user(), Ok(RawResponse::new(500, "boom"))],
            refused(),
        )
        .await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Unavailable {
                service: "Product",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_product_body_is_unavailable() {
        let h = harness(vec![user(), Ok(RawResponse::new(200, "{}"))], refused()).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 1)
            .await
            .unwrap_err();

        assert_eq!(err.category(), crate::ErrorCategory::Unavailable);
        assert!(h.orders.is_empty().await);
    }

    #[tokio::test]
    async fn publish_failure_keeps_the_committed_order() {
        let h = harness(vec![user(), product(250, 10)], refused()).await;
        h.broker.set_available(false);

        let order = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 2)
            .await
            .unwrap();

        assert_eq!(order.total_price, Money::from_cents(500));
        assert_eq!(h.orders.len().await, 1);
        assert_eq!(h.broker.queue_depth("watcher"), 0);
    }

    #[tokio::test]
    async fn store_fault_is_internal() {
        let h = harness(vec![user(), product(250, 10)], refused()).await;
        h.orders.set_unavailable(true).await;

        let err = h
            .orchestrator
            .create_order(UserId::new(1), ProductId::new(5), 2)
            .await
            .unwrap_err();

        assert_eq!(err.category(), crate::ErrorCategory::Internal);
        assert_eq!(h.broker.queue_depth("watcher"), 0);
    }
}
