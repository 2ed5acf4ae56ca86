//! Error types for ratewindow.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for ratewindow operations.
#[derive(Error, Debug)]
pub enum RateWindowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected construction arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Window persistence failed and the limiter is configured to surface it
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratewindow operations.
pub type Result<T> = std::result::Result<T, RateWindowError>;
