use std::time::Duration;

/// A broadcast topic. Every bound queue receives a copy of each message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub durable: bool,
}

impl TopicSpec {
    /// A topic that survives a broker restart.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// A queue and its delivery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Ready messages older than this are expired.
    pub message_ttl: Option<Duration>,
    /// Queue that receives expired messages. Without one they are dropped.
    pub dead_letter: Option<String>,
}

impl QueueSpec {
    /// A durable queue with no TTL and no dead-letter target.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            message_ttl: None,
            dead_letter: None,
        }
    }

    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    pub fn with_dead_letter(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter = Some(queue.into());
        self
    }
}
