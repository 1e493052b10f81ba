//! Broker abstraction for durable fanout messaging.
//!
//! Publishers write to a [`TopicSpec`] topic; each bound [`QueueSpec`] queue
//! receives its own copy. Consumers acknowledge manually, and a message's
//! processing history travels with it in [`DeliveryAttempt`].

pub mod broker;
pub mod error;
pub mod memory;
pub mod message;
pub mod topology;

pub use broker::{Broker, Connection, Subscription};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryConnection, InMemorySubscription};
pub use message::{
    DEATH_REASON_HEADER, Delivery, DeliveryAttempt, DeliveryTag, Message, MessageId,
    ORIGINAL_QUEUE_HEADER,
};
pub use topology::{QueueSpec, TopicSpec};
