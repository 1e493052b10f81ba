//! Domain layer for the order fulfillment services.
//!
//! This crate provides:
//! - Entities owned by each service: [`User`], [`Product`], [`Order`]
//! - The [`OrderEvent`] contract shared by the publisher and the consumer
//! - Record store traits with in-memory implementations

pub mod error;
pub mod events;
pub mod money;
pub mod order;
pub mod product;
pub mod store;
pub mod user;

pub use common::{OrderId, ProductId, UserId};
pub use error::{Result, StoreError};
pub use events::{DecodedEvent, ORDER_CREATED, OrderEvent};
pub use money::Money;
pub use order::{NewOrder, Order, OrderStatus};
pub use product::{NewProduct, Product, StockDecrement};
pub use store::{
    InMemoryOrderStore, InMemoryProductStore, InMemoryUserStore, OrderStore, ProductStore,
    UserStore,
};
pub use user::{NewUser, User};
