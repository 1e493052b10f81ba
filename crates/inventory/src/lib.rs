//! Inventory side of order fulfillment.
//!
//! Subscribes to the order events topic and decrements product stock for
//! each `ORDER_CREATED`. Processing faults are retried by redelivery and
//! dead-lettered once retries run out.

pub mod config;
pub mod error;
pub mod handler;
pub mod worker;

pub use config::ConsumerConfig;
pub use error::{ConsumerError, Result};
pub use handler::{Disposition, Effect, LAST_ERROR_HEADER, SkipReason, StockConsumer};
pub use worker::{ConsumerHandle, InventoryConsumer};
