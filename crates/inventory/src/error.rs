use domain::StoreError;
use messaging::BrokerError;
use thiserror::Error;

/// Errors that can occur in the inventory consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The broker connection failed or was lost.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The product store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The consumer task panicked.
    #[error("Consumer task failed: {0}")]
    Task(String),
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;
