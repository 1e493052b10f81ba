//! HTTP handlers, one module per service.

pub mod orders;
pub mod products;
pub mod system;
pub mod users;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a numeric path id, naming the resource in the error.
pub(crate) fn parse_id<I: FromStr>(raw: &str, resource: &str) -> Result<I, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {resource} id: {raw}")))
}
