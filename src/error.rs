//! Hydration engine error types
//!
//! Hydration and payload building never fail; these errors cover
//! configuration, catalog lookups and the storage reference implementation.

use thiserror::Error;

/// Hydration engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference lookup error
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for hydration operations
pub type Result<T> = std::result::Result<T, Error>;
