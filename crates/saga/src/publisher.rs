//! Hands committed orders over to the asynchronous side.

use domain::OrderEvent;
use messaging::{Broker, Connection, Message, TopicSpec};

use crate::error::PublishError;

/// Header carrying the event type next to the opaque body.
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Publishes order events to a durable fanout topic.
///
/// Each publish opens its own connection and closes it afterwards.
#[derive(Debug, Clone)]
pub struct EventPublisher<B> {
    broker: B,
    topic: TopicSpec,
}

impl<B: Broker> EventPublisher<B> {
    /// Creates a publisher for the named topic.
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: TopicSpec::durable(topic),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    /// Publishes `event` as a persistent message.
    ///
    /// Must only be called after the order it describes is committed.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, topic = %self.topic.name))]
    pub async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let result = self.try_publish(event).await;
        match &result {
            Ok(()) => {
                metrics::counter!("order_events_published_total").increment(1);
                tracing::info!(event_type = %event.event_type, "order event published");
            }
            Err(e) => {
                metrics::counter!("order_events_publish_failures_total").increment(1);
                tracing::warn!(error = %e, "order event publish failed");
            }
        }
        result
    }

    async fn try_publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let body = event.to_bytes()?;
        let message = Message::persistent(body).with_header(EVENT_TYPE_HEADER, event.event_type.as_str());

        let connection = self.broker.connect().await?;
        let result = self.publish_on(connection.as_ref(), message).await;
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "closing publisher connection failed");
        }
        result
    }

    async fn publish_on(
        &self,
        connection: &dyn Connection,
        message: Message,
    ) -> Result<(), PublishError> {
        connection.declare_topic(&self.topic).await?;
        connection.publish(&self.topic.name, message).await?;
        Ok(())
    }
}
