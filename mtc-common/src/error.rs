//! Common error types for the corpus builder

use thiserror::Error;

/// Common result type for corpus builder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the workspace
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input document (taxonomy XML, API payload)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Remote service unreachable or returned an error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
