use thiserror::Error;

use crate::persistence::DatabaseError;

/// Core error taxonomy. Validation and funds failures are returned
/// synchronously to API callers; the losing side of a close race is not an
/// error at all (the close path returns `None`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: required {required:.2} USD, available {available:.2} USD")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("position not open: {0}")]
    PositionNotOpen(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
