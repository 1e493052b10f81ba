//! Order placement saga.
//!
//! The [`OrderOrchestrator`] validates an order against the user and product
//! services through resilient calls, commits it, and hands it to the
//! [`EventPublisher`]. Stock is decremented asynchronously by whoever
//! consumes the published event.

pub mod error;
pub mod orchestrator;
pub mod publisher;

pub use error::{ErrorCategory, PlacementError, PublishError, Result};
pub use orchestrator::{DEFAULT_PUBLISH_TIMEOUT, OrderOrchestrator, PRODUCT_SERVICE, USER_SERVICE};
pub use publisher::{EVENT_TYPE_HEADER, EventPublisher};
