//! Record store seams for the three services.
//!
//! Each service owns its records. The order service never mutates products;
//! stock only changes through [`ProductStore::try_decrement`], which the
//! inventory consumer calls.

pub mod memory;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};

use crate::Result;
use crate::order::{NewOrder, Order};
use crate::product::{NewProduct, Product, StockDecrement};
use crate::user::{NewUser, User};

pub use memory::{InMemoryOrderStore, InMemoryProductStore, InMemoryUserStore};

/// Persistence for users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persists a new user and returns it with its assigned id.
    async fn insert(&self, user: NewUser) -> Result<User>;

    /// Looks up a user by id.
    async fn get(&self, id: UserId) -> Result<Option<User>>;

    /// Returns all users ordered by id.
    async fn list(&self) -> Result<Vec<User>>;
}

/// Persistence for products and their stock.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Persists a new product and returns it with its assigned id.
    async fn insert(&self, product: NewProduct) -> Result<Product>;

    /// Looks up a product by id.
    async fn get(&self, id: ProductId) -> Result<Option<Product>>;

    /// Returns all products ordered by id.
    async fn list(&self) -> Result<Vec<Product>>;

    /// Atomically decrements stock if at least `quantity` units are available.
    ///
    /// Insufficient stock and unknown products are reported through
    /// [`StockDecrement`], not as errors.
    async fn try_decrement(&self, id: ProductId, quantity: u32) -> Result<StockDecrement>;
}

/// Persistence for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Commits a validated order and returns it with its assigned id.
    async fn insert(&self, order: NewOrder) -> Result<Order>;

    /// Looks up an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns all orders ordered by id.
    async fn list(&self) -> Result<Vec<Order>>;
}
