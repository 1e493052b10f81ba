use async_trait::async_trait;

use crate::{Delivery, DeliveryTag, Message, QueueSpec, Result, TopicSpec};

/// Entry point to a message broker.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// An open connection to a broker.
///
/// Declarations are idempotent: redeclaring an identical topic or queue is a
/// no-op, redeclaring with different settings fails.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ensures a broadcast topic exists.
    async fn declare_topic(&self, spec: &TopicSpec) -> Result<()>;

    /// Ensures a queue exists.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Routes every message published to `topic` into `queue` as well.
    async fn bind(&self, queue: &str, topic: &str) -> Result<()>;

    /// Publishes to every queue bound to `topic`.
    async fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// Appends a message directly to the back of `queue`.
    async fn send(&self, queue: &str, message: Message) -> Result<()>;

    /// Starts consuming `queue` with manual acknowledgement.
    ///
    /// At most `prefetch` deliveries are outstanding at once.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Subscription>>;

    /// Closes the connection. Unacknowledged deliveries return to their queues
    /// and blocked receives fail with [`crate::BrokerError::ConnectionClosed`].
    async fn close(&self) -> Result<()>;

    /// Returns false once the connection is closed.
    fn is_open(&self) -> bool;
}

/// A consumer attached to one queue.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Waits for the next delivery.
    ///
    /// Fails once the underlying connection is closed.
    async fn next(&mut self) -> Result<Delivery>;

    /// Acknowledges a delivery, removing it from the broker for good.
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;
}
