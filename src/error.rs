//! Top-level error type.

use tessera_core::CoreError;
use tessera_migrate::MigrationError;
use tessera_postgres::PgError;
use thiserror::Error;

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Any error the facade can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Tenant id, schema name, or policy validation failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Pool or schema layer failure.
    #[error(transparent)]
    Pool(#[from] PgError),

    /// Migration engine failure.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Tenant discovery failed.
    #[error("tenant discovery failed: {0}")]
    Discovery(String),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_preserves_messages() {
        let err: Error = CoreError::config("max_pools must be >= 1").into();
        assert!(err.to_string().contains("max_pools"));

        let err: Error = MigrationError::NoTenants.into();
        assert!(err.to_string().contains("no tenants"));
    }
}
