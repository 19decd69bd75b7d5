//! IC error types

use thiserror::Error;

/// Errors raised while loading or dumping IC configuration
#[derive(Debug, Error)]
pub enum IcError {
    /// JSON could not be parsed or produced
    #[error("Invalid IC config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A config value is out of range
    #[error("Invalid IC config: {0}")]
    InvalidConfig(String),
}

/// Result alias for configuration operations
pub type IcResult<T> = Result<T, IcError>;
