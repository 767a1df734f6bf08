//! Error types for PostgreSQL operations.

use tessera_core::CoreError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur in the pool and schema layer.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Core validation error (tenant id, schema name, policy).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pool could not be created even after retrying.
    #[error("failed to create pool for tenant '{tenant_id}' after {attempts} attempts: {source}")]
    PoolCreationFailed {
        /// The tenant whose pool failed to come up.
        tenant_id: String,
        /// How many connection attempts were made.
        attempts: u32,
        /// The final error.
        #[source]
        source: Box<PgError>,
    },

    /// The pool cache is full and no entry can be evicted.
    #[error("pool limit of {max_pools} reached and no pool is evictable")]
    PoolExhausted {
        /// Configured `max_pools`.
        max_pools: usize,
    },

    /// An operation targeted a tenant whose schema does not exist.
    #[error("schema for tenant '{tenant_id}' does not exist")]
    SchemaMissing {
        /// The unknown tenant.
        tenant_id: String,
    },

    /// Refused to drop a non-empty schema without `cascade` or `force`.
    #[error("schema '{schema}' is not empty; pass cascade or force to drop it")]
    SchemaNotEmpty {
        /// The schema that still holds objects.
        schema: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// The manager has been disposed.
    #[error("pool manager has been disposed")]
    Disposed,

    /// One or more pools failed while tearing the manager down.
    #[error("dispose failed: {0}")]
    Dispose(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a pool-creation failure.
    pub fn pool_creation_failed(
        tenant_id: impl Into<String>,
        attempts: u32,
        source: PgError,
    ) -> Self {
        Self::PoolCreationFailed {
            tenant_id: tenant_id.into(),
            attempts,
            source: Box::new(source),
        }
    }

    /// Create a schema-missing error.
    pub fn schema_missing(tenant_id: impl Into<String>) -> Self {
        Self::SchemaMissing {
            tenant_id: tenant_id.into(),
        }
    }

    /// Check if this is a connection-level error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::PoolCreationFailed { .. })
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let err = PgError::config("bad url");
        assert!(matches!(err, PgError::Config(_)));

        let err = PgError::pool_creation_failed("t1", 5, PgError::Timeout(5000));
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("t1"));
        assert!(err.to_string().contains("5 attempts"));

        assert!(PgError::Timeout(100).is_timeout());
    }

    #[test]
    fn test_schema_missing_names_tenant() {
        let err = PgError::schema_missing("ghost");
        assert!(err.to_string().contains("ghost"));
    }
}
