//! Order placement error types.

use common::{ProductId, UserId};
use domain::StoreError;
use messaging::BrokerError;
use resilience::CallFailure;
use thiserror::Error;

/// How a placement failure should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request itself is invalid. Retrying will not help.
    Client,
    /// A dependency is down or unreachable. Try again later.
    Unavailable,
    /// A local fault.
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Client => "client",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Errors that can occur while placing an order.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// Quantity must be at least one.
    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    /// The user service answered 404.
    #[error("User not found")]
    UserNotFound(UserId),

    /// The product service answered 404.
    #[error("Product not found")]
    ProductNotFound(ProductId),

    /// The product has fewer units than requested.
    #[error("Not enough stock")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// A validation dependency failed, timed out or is behind an open breaker.
    #[error("{service} service unavailable")]
    Unavailable {
        /// Display name, e.g. "User".
        service: &'static str,
        failure: CallFailure,
    },

    /// The order could not be committed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl PlacementError {
    /// Returns the reporting category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlacementError::InvalidQuantity
            | PlacementError::UserNotFound(_)
            | PlacementError::ProductNotFound(_)
            | PlacementError::InsufficientStock { .. } => ErrorCategory::Client,
            PlacementError::Unavailable { .. } => ErrorCategory::Unavailable,
            PlacementError::Store(_) => ErrorCategory::Internal,
        }
    }
}

/// Errors that can occur while publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish timed out")]
    Timeout,
}

/// Convenience type alias for placement results.
pub type Result<T> = std::result::Result<T, PlacementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_separate_bad_requests_from_outages() {
        assert_eq!(
            PlacementError::UserNotFound(UserId::new(1)).category(),
            ErrorCategory::Client
        );
        assert_eq!(
            PlacementError::InsufficientStock {
                product_id: ProductId::new(1),
                available: 5,
                requested: 10
            }
            .category(),
            ErrorCategory::Client
        );
        assert_eq!(
            PlacementError::Unavailable {
                service: "User",
                failure: CallFailure::BreakerOpen {
                    target: "users".to_string()
                }
            }
            .category(),
            ErrorCategory::Unavailable
        );
        assert_eq!(
            PlacementError::Store(StoreError::Unavailable("down".to_string())).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn unavailable_message_names_the_service() {
        let err = PlacementError::Unavailable {
            service: "Product",
            failure: CallFailure::Timeout {
                target: "products".to_string(),
                timeout: std::time::Duration::from_secs(3),
            },
        };
        assert_eq!(err.to_string(), "Product service unavailable");
    }
}
