use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header naming the queue a dead-lettered message came from.
pub const ORIGINAL_QUEUE_HEADER: &str = "x-original-queue";

/// Header recording why a message was dead-lettered.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing history carried with a message across redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Failed processing attempts so far. Starts at zero.
    pub retry_count: u32,
}

impl DeliveryAttempt {
    /// Returns the attempt that follows a failed one.
    pub fn next(self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
        }
    }
}

/// A message envelope as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable across redeliveries and dead-lettering.
    pub id: MessageId,

    /// Opaque payload.
    pub body: Vec<u8>,

    /// Whether the broker keeps the message across a restart.
    pub persistent: bool,

    pub attempt: DeliveryAttempt,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub published_at: DateTime<Utc>,
}

impl Message {
    /// Creates a transient message with a fresh id.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId::new(),
            body: body.into(),
            persistent: false,
            attempt: DeliveryAttempt::default(),
            headers: BTreeMap::new(),
            published_at: Utc::now(),
        }
    }

    /// Creates a message the broker must keep across restarts.
    pub fn persistent(body: impl Into<Vec<u8>>) -> Self {
        Self {
            persistent: true,
            ..Self::new(body)
        }
    }

    /// Sets the delivery attempt metadata.
    pub fn with_attempt(mut self, attempt: DeliveryAttempt) -> Self {
        self.attempt = attempt;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns a copy carrying the same id and body with the next retry count.
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt.next(),
            published_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Identifies an unacknowledged delivery on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub message: Message,
    /// True if the broker delivered this message before without an ack.
    pub redelivered: bool,
}
