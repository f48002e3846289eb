//! Error types for boba-core

use thiserror::Error;

/// Result type alias using boba-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in boba-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),
}
