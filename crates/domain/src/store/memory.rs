//! In-memory record stores.
//!
//! Ids are assigned sequentially from 1. Each store can be switched into an
//! unavailable mode to exercise fault paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use tokio::sync::RwLock;

use super::{OrderStore, ProductStore, UserStore};
use crate::order::{NewOrder, Order, OrderStatus};
use crate::product::{NewProduct, Product, StockDecrement};
use crate::user::{NewUser, User};
use crate::{Result, StoreError};

#[derive(Debug)]
struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
    unavailable: bool,
    /// Number of upcoming calls that fail before the store recovers.
    failures_remaining: u32,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            unavailable: false,
            failures_remaining: 0,
        }
    }
}

impl<T: Clone> Table<T> {
    fn check_available(&mut self, store: &str) -> Result<()> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(StoreError::Unavailable(format!("{store} store is down")));
        }
        if self.unavailable {
            return Err(StoreError::Unavailable(format!("{store} store is down")));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn values(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }
}

macro_rules! fault_injection {
    ($store:ident) => {
        impl $store {
            /// Makes every subsequent call fail (or recover) until toggled.
            pub async fn set_unavailable(&self, unavailable: bool) {
                self.table.write().await.unavailable = unavailable;
            }

            /// Makes the next `count` calls fail, then recovers.
            pub async fn fail_next(&self, count: u32) {
                self.table.write().await.failures_remaining = count;
            }

            /// Returns the number of stored records.
            pub async fn len(&self) -> usize {
                self.table.read().await.rows.len()
            }

            /// Returns true if nothing has been stored.
            pub async fn is_empty(&self) -> bool {
                self.table.read().await.rows.is_empty()
            }
        }
    };
}

/// In-memory user store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    table: Arc<RwLock<Table<User>>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fault_injection!(InMemoryUserStore);

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let mut table = self.table.write().await;
        table.check_available("user")?;
        if user.name.trim().is_empty() {
            return Err(StoreError::Invalid("user name must not be empty".to_string()));
        }
        if table.rows.values().any(|u| u.email == user.email) {
            return Err(StoreError::Invalid("email already registered".to_string()));
        }

        let id = table.allocate_id();
        let user = User {
            id: UserId::new(id),
            name: user.name,
            email: user.email,
        };
        table.rows.insert(id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let mut table = self.table.write().await;
        table.check_available("user")?;
        Ok(table.rows.get(&id.get()).cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut table = self.table.write().await;
        table.check_available("user")?;
        Ok(table.values())
    }
}

/// In-memory product store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductStore {
    table: Arc<RwLock<Table<Product>>>,
}

impl InMemoryProductStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current stock of a product, bypassing fault injection.
    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.table.read().await.rows.get(&id.get()).map(|p| p.stock)
    }
}

fault_injection!(InMemoryProductStore);

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn insert(&self, product: NewProduct) -> Result<Product> {
        let mut table = self.table.write().await;
        table.check_available("product")?;
        if product.price.is_negative() {
            return Err(StoreError::Invalid(format!(
                "product price must not be negative: {}",
                product.price
            )));
        }

        let id = table.allocate_id();
        let product = Product {
            id: ProductId::new(id),
            name: product.name,
            description: product.description,
            price: product.price,
            stock: product.stock,
        };
        table.rows.insert(id, product.clone());
        Ok(product)
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let mut table = self.table.write().await;
        table.check_available("product")?;
        Ok(table.rows.get(&id.get()).cloned())
    }

    async fn list(&self) -> Result<Vec<Product>> {
        let mut table = self.table.write().await;
        table.check_available("product")?;
        Ok(table.values())
    }

    async fn try_decrement(&self, id: ProductId, quantity: u32) -> Result<StockDecrement> {
        let mut table = self.table.write().await;
        table.check_available("product")?;

        let Some(product) = table.rows.get_mut(&id.get()) else {
            return Ok(StockDecrement::NotFound);
        };

        let outcome = StockDecrement::evaluate(product.stock, quantity);
        if let StockDecrement::Applied { remaining } = outcome {
            product.stock = remaining;
        }
        Ok(outcome)
    }
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<Table<Order>>>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fault_injection!(InMemoryOrderStore);

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let mut table = self.table.write().await;
        table.check_available("order")?;
        if order.quantity == 0 {
            return Err(StoreError::Invalid("order quantity must be positive".to_string()));
        }

        let id = table.allocate_id();
        let order = Order {
            id: OrderId::new(id),
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            total_price: order.total_price,
            status: OrderStatus::Created,
        };
        table.rows.insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let mut table = self.table.write().await;
        table.check_available("order")?;
        Ok(table.rows.get(&id.get()).cloned())
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let mut table = self.table.write().await;
        table.check_available("order")?;
        Ok(table.values())
    }
}
