//! # tessera-core
//!
//! Core building blocks for the Tessera multi-tenant toolkit.
//!
//! This crate provides the leaf types shared by the rest of the workspace:
//! - Tenant identifiers with PostgreSQL-safe validation
//! - Schema-name templating (tenant id → schema name)
//! - A retry engine with exponential backoff and jitter
//! - Lifecycle hook callbacks with panic trapping
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{SchemaTemplate, TenantId};
//!
//! let tenant: TenantId = "acme".parse().unwrap();
//! let template = SchemaTemplate::default();
//! let schema = template.schema_name(&tenant).unwrap();
//! assert_eq!(schema.as_str(), "tenant_acme");
//! ```

pub mod error;
pub mod hooks;
pub mod retry;
pub mod tenant;

pub use error::{CoreError, CoreResult};
pub use hooks::Hooks;
pub use retry::{RetryError, RetryOutcome, RetryPolicy, default_is_retryable, is_transient_message};
pub use tenant::{SchemaName, SchemaTemplate, TenantId};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::hooks::Hooks;
    pub use crate::retry::{RetryError, RetryOutcome, RetryPolicy};
    pub use crate::tenant::{SchemaName, SchemaTemplate, TenantId};
}
