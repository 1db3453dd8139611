//! Common error types for riff crates

use thiserror::Error;

/// Common result type for riff operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared across riff crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
