//! Error types for till-core

use thiserror::Error;

/// Result type alias using till-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in till-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough stock to cover the requested quantity
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A sale line has no positive cost price; profit figures would be wrong
    #[error("Missing cost price for product {0}; sale aborted")]
    MissingCostPrice(String),

    /// A two-phase request is not in the state the transition expects
    #[error("Invalid state for {id}: expected {expected}, found {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    /// The current user lacks a permission string
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No user is logged in
    #[error("No active session")]
    NotAuthenticated,

    /// No user matches the supplied PIN
    #[error("Invalid PIN")]
    InvalidPin,

    /// Optimistic update against a stale snapshot
    #[error("Version conflict on {id}: expected version {expected}, stored version {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Another sale is already being processed
    #[error("Another sale is in progress")]
    Busy,
}

impl Error {
    /// Whether the error was raised by input validation, before any write.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InvalidInput(_)
                | Self::InsufficientStock { .. }
                | Self::MissingCostPrice(_)
                | Self::InvalidState { .. }
                | Self::PermissionDenied(_)
                | Self::NotAuthenticated
                | Self::InvalidPin
                | Self::VersionConflict { .. }
                | Self::Busy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        assert!(Error::Busy.is_validation());
        assert!(Error::MissingCostPrice("P1".to_string()).is_validation());
        assert!(!Error::Database("disk full".to_string()).is_validation());
    }

    #[test]
    fn insufficient_stock_message_names_product() {
        let error = Error::InsufficientStock {
            product_id: "P1".to_string(),
            available: 1,
            requested: 3,
        };
        assert!(error.to_string().contains("P1"));
        assert!(error.to_string().contains("requested 3"));
    }
}
