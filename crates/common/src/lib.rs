//! Shared types used across the order, product and user services.

pub mod types;

pub use types::{OrderId, ProductId, UserId};
