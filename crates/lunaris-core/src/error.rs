//! Error types for Lunaris Engine

use thiserror::Error;

/// Main error type for Lunaris operations
#[derive(Error, Debug)]
pub enum Error {
    /// Initialization error
    #[error("Initialization failed: {0}")]
    Init(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using Lunaris Error
pub type Result<T> = std::result::Result<T, Error>;
