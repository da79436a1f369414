//! Unified engine error type.
//!
//! Only construction and configuration paths surface an [`EngineError`];
//! runtime sync and persistence paths log their failures and degrade to the
//! best available local state instead of erroring (availability over strict
//! consistency).

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The remote cart client could not be constructed.
    #[error("Remote cart error: {0}")]
    Remote(#[from] RemoteError),

    /// A storage medium could not be set up.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Config(ConfigError::MissingEnvVar("MERIDIAN_CART_API_URL".into()));
        assert_eq!(
            err.to_string(),
            "Config error: Missing environment variable: MERIDIAN_CART_API_URL"
        );
    }
}
