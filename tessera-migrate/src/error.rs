//! Error types for the migration engine.

use std::path::PathBuf;

use tessera_core::CoreError;
use tessera_postgres::PgError;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool or database error.
    #[error(transparent)]
    Pg(#[from] PgError),

    /// Core validation error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A migration file name does not carry a leading timestamp.
    #[error("invalid migration name '{0}': file names must start with a digit sequence")]
    InvalidMigrationName(String),

    /// Two files resolve to the same migration name.
    #[error("duplicate migration '{0}'")]
    DuplicateMigration(String),

    /// A required migrations folder is absent.
    #[error("migrations folder not found: {0}")]
    MissingFolder(PathBuf),

    /// The tracking table exists but matches no recognized format.
    #[error("unrecognized tracking table format in schema '{schema}': {reason}")]
    TrackingFormatUnknown {
        /// Schema holding the table.
        schema: String,
        /// What made detection fail.
        reason: String,
    },

    /// A migration's SQL failed; the transaction was rolled back.
    #[error("migration '{migration}' failed for tenant '{tenant_id}': {source}")]
    MigrationFailed {
        /// The affected tenant.
        tenant_id: String,
        /// The failing migration name.
        migration: String,
        /// The database error.
        #[source]
        source: Box<PgError>,
    },

    /// Schema introspection failed for one tenant.
    #[error("introspection failed for tenant '{tenant_id}': {source}")]
    IntrospectionFailed {
        /// The affected tenant.
        tenant_id: String,
        /// The underlying error.
        #[source]
        source: Box<PgError>,
    },

    /// An operation needs at least one tenant.
    #[error("no tenants to operate on")]
    NoTenants,

    /// A user seed closure failed.
    #[error("seed failed for '{target}': {message}")]
    SeedFailed {
        /// Tenant id or the shared namespace.
        target: String,
        /// Rendered seed error.
        message: String,
    },
}

impl MigrationError {
    /// Create an unknown-format error.
    pub fn format_unknown(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TrackingFormatUnknown {
            schema: schema.into(),
            reason: reason.into(),
        }
    }

    /// Create a migration-failed error.
    pub fn migration_failed(
        tenant_id: impl Into<String>,
        migration: impl Into<String>,
        source: PgError,
    ) -> Self {
        Self::MigrationFailed {
            tenant_id: tenant_id.into(),
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    /// Create an introspection-failed error.
    pub fn introspection_failed(tenant_id: impl Into<String>, source: PgError) -> Self {
        Self::IntrospectionFailed {
            tenant_id: tenant_id.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::InvalidMigrationName("init.sql".to_string());
        assert!(err.to_string().contains("init.sql"));

        let err = MigrationError::format_unknown("tenant_a", "mixed name and hash columns");
        assert!(err.to_string().contains("tenant_a"));
        assert!(err.to_string().contains("mixed"));
    }

    #[test]
    fn test_migration_failed_names_both_sides() {
        let err = MigrationError::migration_failed("t1", "0002_add_users", PgError::Timeout(10));
        let msg = err.to_string();
        assert!(msg.contains("t1"));
        assert!(msg.contains("0002_add_users"));
    }
}
