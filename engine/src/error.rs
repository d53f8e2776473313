//! Error types for the cartsync engine.

use crate::{operation::SyncPhase, ProductId};
use thiserror::Error;

/// All possible errors from the cartsync engine.
///
/// Every variant describes malformed input; none of them leave state behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: u32,
    },

    #[error("duplicate product in cart: {0}")]
    DuplicateProduct(ProductId),

    #[error("empty product id")]
    EmptyProductId,

    #[error("user_choice resolution requires a selection")]
    MissingUserChoice,

    #[error("invalid sync transition: {from} -> {to}")]
    InvalidTransition { from: SyncPhase, to: SyncPhase },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
