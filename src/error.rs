use std::{fmt::Display, sync::PoisonError};

/// Custom Result type for pgmem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pgmem
///
/// Every error is reported synchronously by the call that caused it. None of
/// them is retried internally.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed SQL text. `position` is the character offset of the
    /// offending token (or the input length at end of input).
    Parse { message: String, position: usize },
    /// A value failed a type, nullability, length or uniqueness constraint
    Validation(String),
    /// Unknown table/column, bad join target, subquery shape mismatch, ...
    Execution(String),
    /// A registered trigger raised a failure
    Trigger(String),
    /// Commit/rollback without an active transaction, double commit, ...
    TransactionState(String),
    /// Internal error (lock poisoning, snapshot encoding, etc.)
    Internal(String),
}

impl Error {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        Error::Parse {
            message: message.into(),
            position,
        }
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<chrono::ParseError> for Error {
    fn from(value: chrono::ParseError) -> Self {
        Error::Validation(value.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(value: uuid::Error) -> Self {
        Error::Validation(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Validation(value.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(value: rust_decimal::Error) -> Self {
        Error::Validation(value.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(value: regex::Error) -> Self {
        Error::Validation(value.to_string())
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse { message, position } => {
                write!(f, "parse error at position {}: {}", position, message)
            }
            Error::Validation(err) => write!(f, "validation error: {}", err),
            Error::Execution(err) => write!(f, "execution error: {}", err),
            Error::Trigger(err) => write!(f, "trigger error: {}", err),
            Error::TransactionState(err) => write!(f, "transaction state error: {}", err),
            Error::Internal(err) => write!(f, "internal error: {}", err),
        }
    }
}
