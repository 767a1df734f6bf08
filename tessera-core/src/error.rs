//! Error types for core operations.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by the core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tenant id failed validation. Rejected before any I/O happens.
    #[error("invalid tenant id '{id}': {reason}")]
    InvalidTenantId {
        /// The offending id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A schema name (usually produced by the template) is not a valid
    /// PostgreSQL identifier.
    #[error("invalid schema name '{0}'")]
    InvalidSchemaName(String),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Create an invalid-tenant-id error.
    pub fn invalid_tenant_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTenantId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_tenant_id("9bad", "must not start with a digit");
        let msg = err.to_string();
        assert!(msg.contains("9bad"));
        assert!(msg.contains("digit"));
    }
}
