//! Products and stock, owned by the product service.

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A catalogue product with its available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Unit price.
    pub price: Money,
    pub stock: u32,
}

/// Fields supplied when creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    pub stock: u32,
}

/// Result of an attempted stock decrement.
///
/// Only [`StockDecrement::Applied`] mutates the product. The other variants
/// are business outcomes and leave stock untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// Stock was reduced; `remaining` is the new level.
    Applied { remaining: u32 },
    /// The product had fewer units than requested.
    Insufficient { available: u32, requested: u32 },
    /// No product with that id exists.
    NotFound,
}

impl StockDecrement {
    /// Computes the decrement against a current stock level.
    ///
    /// Never produces a negative stock.
    pub fn evaluate(stock: u32, quantity: u32) -> Self {
        match stock.checked_sub(quantity) {
            Some(remaining) => StockDecrement::Applied { remaining },
            None => StockDecrement::Insufficient {
                available: stock,
                requested: quantity,
            },
        }
    }

    /// Returns true if stock was changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, StockDecrement::Applied { .. })
    }
}
