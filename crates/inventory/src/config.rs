use std::time::Duration;

use messaging::{Connection, QueueSpec, TopicSpec};

use crate::Result;

/// Topology and retry settings for the inventory consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Broadcast topic carrying order events.
    pub topic: String,
    /// Durable queue this consumer group reads.
    pub queue: String,
    /// Queue receiving messages that exhausted their retries or expired.
    pub dead_letter_queue: String,
    /// Ready messages older than this are dead-lettered by the broker.
    pub message_ttl: Duration,
    /// Redeliveries allowed after a processing fault.
    pub max_retries: u32,
    pub prefetch: u16,
    /// Fixed wait before re-establishing a lost subscription.
    pub reconnect_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "order.events".to_string(),
            queue: "product-service.order-consumer".to_string(),
            dead_letter_queue: "product-service.order-consumer.dlq".to_string(),
            message_ttl: Duration::from_secs(60),
            max_retries: 3,
            prefetch: 1,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl ConsumerConfig {
    pub fn topic_spec(&self) -> TopicSpec {
        TopicSpec::durable(self.topic.clone())
    }

    pub fn queue_spec(&self) -> QueueSpec {
        QueueSpec::durable(self.queue.clone())
            .with_message_ttl(self.message_ttl)
            .with_dead_letter(self.dead_letter_queue.clone())
    }

    pub fn dead_letter_spec(&self) -> QueueSpec {
        QueueSpec::durable(self.dead_letter_queue.clone())
    }

    /// Declares the topic, both queues and the binding.
    pub async fn declare(&self, connection: &dyn Connection) -> Result<()> {
        connection.declare_topic(&self.topic_spec()).await?;
        connection.declare_queue(&self.dead_letter_spec()).await?;
        connection.declare_queue(&self.queue_spec()).await?;
        connection.bind(&self.queue, &self.topic).await?;
        Ok(())
    }
}
