//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type StockResult<T> = Result<T, StockError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Direct
/// callers see these as precise error codes; event-channel-triggered
/// failures are logged and swallowed at the consuming boundary instead of
/// being propagated back to the producer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// A requested debit exceeds the available quantity.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// A referenced cell, product, or warehouse is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// An invalid request combination (e.g. identical source/destination).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A concurrent-update conflict that exhausted its retries.
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),

    /// A storage-layer failure (connection, poisoned lock, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

impl StockError {
    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::SerializationConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
