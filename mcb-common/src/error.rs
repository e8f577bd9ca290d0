//! Common error types for MCB

use thiserror::Error;

/// Common result type for MCB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the MCB crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport or status error from the repository API
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upload channel error (framing, connect exhaustion)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Response or document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
