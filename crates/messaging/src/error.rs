use thiserror::Error;

/// Errors that can occur when talking to a message broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The connection was closed, locally or by the broker.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The topic has not been declared.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The queue has not been declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A redeclaration disagreed with the existing declaration.
    #[error("Declaration of {name} does not match the existing one")]
    TopologyMismatch { name: String },

    /// The delivery tag is unknown or was already acknowledged.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    /// A message body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        BrokerError::Serialization(error.to_string())
    }
}

impl BrokerError {
    /// Returns true if the error means the connection must be re-established.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            BrokerError::Unavailable(_) | BrokerError::ConnectionClosed
        )
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
