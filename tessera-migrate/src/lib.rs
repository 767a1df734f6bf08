//! # tessera-migrate
//!
//! Migration engine for the Tessera multi-tenant toolkit.
//!
//! This crate provides functionality for:
//! - Discovering `*.sql` migration files and hashing their content
//! - Detecting the tracking table's format (`name`, `hash`, `drizzle-kit`)
//! - Applying migrations per tenant, one transaction per migration
//! - Fanning out across the tenant fleet with bounded concurrency
//! - Shared-schema migrations with their own tracking table
//! - Reconciling disk state with tracking tables (sync)
//! - Detecting structural drift between tenant schemas
//! - Running user seed code per tenant and against the shared schema
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ *.sql files │────▶│ TenantMigrator│────▶│ Tracking Tbl │
//! └─────────────┘     └───────┬───────┘     └──────────────┘
//!                             │ fan-out (batches of N)
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!        tenant_acme    tenant_globex   tenant_initech
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_migrate::{MigrateAllOptions, MigrationSettings, TenantMigrator};
//!
//! async fn run(manager: tessera_postgres::PoolManager) -> Result<(), Box<dyn std::error::Error>> {
//!     let migrator = TenantMigrator::new(
//!         manager,
//!         MigrationSettings::new().tenant_folder("./migrations/tenant"),
//!         Default::default(),
//!     );
//!
//!     let tenants = vec!["acme".parse()?, "globex".parse()?];
//!     let result = migrator.migrate_all(tenants, &MigrateAllOptions::new()).await?;
//!     println!("{}", result.describe());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod drift;
pub mod error;
pub mod executor;
pub mod file;
pub mod format;
pub mod introspect;
pub mod seed;
pub mod shared;
pub mod sync;

pub use batch::{BatchSummary, ErrorPolicy, SKIPPED_BY_ABORT, TaskOutcome, run_batched};
pub use drift::{
    ColumnDrift, ColumnDriftKind, DriftDetector, DriftOptions, DriftReport, ObjectDrift,
    ObjectDriftKind, TableDrift, TableStatus, TenantDrift, diff_snapshots, normalize_default,
};
pub use error::{MigrateResult, MigrationError};
pub use executor::{
    MigrateAllOptions, MigrateAllResult, MigrateOptions, MigrationSettings, StatusEntry,
    StatusReport, TenantMigrationResult, TenantMigrator, TenantStatus,
};
pub use file::{MigrationFile, MigrationLoader, compute_hash, normalize_sql};
pub use format::{
    AppliedMigration, FormatChoice, FormatInfo, TableFormat, TrackingTable,
    applied_identifiers, is_applied, orphan_identifiers, pending_files,
};
pub use introspect::{
    ColumnSnapshot, ConstraintSnapshot, IndexSnapshot, IntrospectOptions, SchemaSnapshot,
    TableSnapshot, introspect_schema,
};
pub use seed::{
    SeedAllResult, SeedError, SeedOptions, SeedResult, Seeder, SharedSeed, TenantSeed, seed_fn,
    shared_seed_fn,
};
pub use shared::{SharedMigrationResult, SharedMigrator, SharedStatus};
pub use sync::{SyncEntry, SyncManager, SyncMutationReport, SyncReport, SyncStatus};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::batch::{BatchSummary, ErrorPolicy};
    pub use crate::drift::{DriftDetector, DriftOptions, DriftReport};
    pub use crate::error::{MigrateResult, MigrationError};
    pub use crate::executor::{
        MigrateAllOptions, MigrateOptions, MigrationSettings, TenantMigrator,
    };
    pub use crate::file::{MigrationFile, MigrationLoader};
    pub use crate::format::{FormatChoice, TableFormat};
    pub use crate::seed::{Seeder, SharedSeed, TenantSeed};
    pub use crate::shared::SharedMigrator;
    pub use crate::sync::SyncManager;
}
