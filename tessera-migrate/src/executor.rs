//! Per-tenant migration application.
//!
//! One tenant is processed sequentially: pending migrations apply in
//! file-name order, each inside its own transaction together with its
//! tracking-table row. Parallelism happens across tenants, never within
//! one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tessera_core::{Hooks, TenantId};
use tessera_postgres::{PgConnection, PoolManager};
use tracing::{info, warn};

use crate::batch::{BatchSummary, ErrorPolicy, SKIPPED_BY_ABORT, TaskOutcome, run_batched};
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationFile, MigrationLoader};
use crate::format::{
    AppliedMigration, FormatChoice, TableFormat, TrackingTable, applied_identifiers,
    pending_files,
};

/// Filesystem and tracking-table configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Folder holding per-tenant migrations.
    pub tenant_folder: PathBuf,
    /// Folder holding shared-schema migrations, if any.
    pub shared_folder: Option<PathBuf>,
    /// Tracking table name inside each tenant schema.
    pub migrations_table: String,
    /// Tracking table name inside the shared schema.
    pub shared_table: String,
    /// Format selection for new tracking tables.
    pub table_format: FormatChoice,
    /// Format used when `table_format` is `Auto` and no table exists.
    pub default_format: TableFormat,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            tenant_folder: PathBuf::from("./migrations"),
            shared_folder: None,
            migrations_table: "__drizzle_migrations".to_string(),
            shared_table: "__drizzle_shared_migrations".to_string(),
            table_format: FormatChoice::Auto,
            default_format: TableFormat::Name,
        }
    }
}

impl MigrationSettings {
    /// Settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant migrations folder.
    pub fn tenant_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.tenant_folder = folder.into();
        self
    }

    /// Set the shared migrations folder.
    pub fn shared_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.shared_folder = Some(folder.into());
        self
    }

    /// Set the tenant tracking table name.
    pub fn migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    /// Set the shared tracking table name.
    pub fn shared_table(mut self, table: impl Into<String>) -> Self {
        self.shared_table = table.into();
        self
    }

    /// Set the format selection.
    pub fn table_format(mut self, choice: FormatChoice) -> Self {
        self.table_format = choice;
        self
    }

    /// Set the default format for `Auto`.
    pub fn default_format(mut self, format: TableFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.migrations_table.is_empty() || self.shared_table.is_empty() {
            return Err(MigrationError::Core(tessera_core::CoreError::config(
                "tracking table names must not be empty",
            )));
        }
        Ok(())
    }
}

/// Options for a single-tenant migration run.
#[derive(Clone, Default)]
pub struct MigrateOptions {
    /// Compute what would apply without touching the database.
    pub dry_run: bool,
    /// Called after each migration commits (tenant, migration name).
    pub on_progress: Option<Arc<dyn Fn(&TenantId, &str) + Send + Sync>>,
}

impl MigrateOptions {
    /// Options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the progress callback.
    pub fn on_progress(mut self, f: impl Fn(&TenantId, &str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MigrateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrateOptions")
            .field("dry_run", &self.dry_run)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Options for a fleet-wide migration run.
#[derive(Clone, Default)]
pub struct MigrateAllOptions {
    /// Tenants migrated concurrently per batch. Defaults to 10.
    pub concurrency: Option<usize>,
    /// Compute what would apply without touching the database.
    pub dry_run: bool,
    /// Called after each migration commits (tenant, migration name).
    pub on_progress: Option<Arc<dyn Fn(&TenantId, &str) + Send + Sync>>,
    /// Failure handler deciding continue vs abort. Defaults to continue.
    pub on_error: Option<Arc<dyn Fn(&TenantId, &MigrationError) -> ErrorPolicy + Send + Sync>>,
}

impl MigrateAllOptions {
    /// Default batch concurrency.
    pub const DEFAULT_CONCURRENCY: usize = 10;

    /// Options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch concurrency.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the progress callback.
    pub fn on_progress(mut self, f: impl Fn(&TenantId, &str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Set the failure handler.
    pub fn on_error(
        mut self,
        f: impl Fn(&TenantId, &MigrationError) -> ErrorPolicy + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MigrateAllOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrateAllOptions")
            .field("concurrency", &self.concurrency)
            .field("dry_run", &self.dry_run)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Result of migrating one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantMigrationResult {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Whether every pending migration committed.
    pub success: bool,
    /// Whether the tenant was never attempted (aborted run).
    pub skipped: bool,
    /// Names of migrations that committed during this run, in order.
    pub applied_migrations: Vec<String>,
    /// Error text when `success` is false.
    pub error: Option<String>,
    /// Wall-clock time for this tenant.
    pub duration_ms: u64,
    /// The tracking table's format, when it was resolved.
    pub format: Option<TableFormat>,
}

impl TenantMigrationResult {
    fn failed(tenant_id: TenantId, error: String) -> Self {
        Self {
            tenant_id,
            success: false,
            skipped: false,
            applied_migrations: Vec::new(),
            error: Some(error),
            duration_ms: 0,
            format: None,
        }
    }

    fn skipped(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            success: false,
            skipped: true,
            applied_migrations: Vec::new(),
            error: Some(SKIPPED_BY_ABORT.to_string()),
            duration_ms: 0,
            format: None,
        }
    }
}

/// Aggregate of a fleet-wide migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrateAllResult {
    /// Tally of the run.
    pub summary: BatchSummary,
    /// Per-tenant details, in input order.
    pub details: Vec<TenantMigrationResult>,
}

impl MigrateAllResult {
    /// One-line description of the run.
    pub fn describe(&self) -> String {
        format!(
            "{} tenants: {} succeeded, {} failed, {} skipped",
            self.summary.total, self.summary.succeeded, self.summary.failed, self.summary.skipped
        )
    }
}

/// Applied/pending breakdown for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The tracking table's format.
    pub format: TableFormat,
    /// Rows recorded in the tracking table, in insertion order.
    pub applied: Vec<AppliedMigration>,
    /// Names of migrations on disk not yet applied, in order.
    pub pending: Vec<String>,
}

/// One tenant's entry in a fleet-wide status report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The status, when it could be read.
    pub status: Option<TenantStatus>,
    /// Error text otherwise.
    pub error: Option<String>,
}

/// Fleet-wide status report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Per-tenant entries, in input order.
    pub entries: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    /// Execute SQL, then record.
    Execute,
    /// Record only; the SQL is assumed to be in effect already.
    MarkOnly,
}

/// Applies migrations to tenant schemas.
#[derive(Clone)]
pub struct TenantMigrator {
    manager: PoolManager,
    settings: MigrationSettings,
    hooks: Hooks,
}

impl TenantMigrator {
    /// Create a migrator.
    pub fn new(manager: PoolManager, settings: MigrationSettings, hooks: Hooks) -> Self {
        Self {
            manager,
            settings,
            hooks,
        }
    }

    /// The migrator's settings.
    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Load the tenant migration folder.
    pub async fn load_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        MigrationLoader::new(&self.settings.tenant_folder).load().await
    }

    /// Apply all pending migrations to one tenant.
    ///
    /// Returns `Ok` with `success = false` when a migration's SQL failed
    /// (everything committed before it stays committed); returns `Err` when
    /// the tenant could not be set up at all (pool, tracking table).
    pub async fn migrate_tenant(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
        options: &MigrateOptions,
    ) -> MigrateResult<TenantMigrationResult> {
        self.run_tenant(tenant_id, files, options, Mode::Execute).await
    }

    /// Record all pending migrations as applied without executing SQL.
    pub async fn mark_as_applied(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
    ) -> MigrateResult<TenantMigrationResult> {
        self.run_tenant(tenant_id, files, &MigrateOptions::default(), Mode::MarkOnly)
            .await
    }

    async fn run_tenant(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
        options: &MigrateOptions,
        mode: Mode,
    ) -> MigrateResult<TenantMigrationResult> {
        self.hooks.fire_before_tenant(tenant_id);
        let outcome = self.run_tenant_inner(tenant_id, files, options, mode).await;
        let success = matches!(&outcome, Ok(result) if result.success);
        self.hooks.fire_after_tenant(tenant_id, success);
        outcome
    }

    async fn run_tenant_inner(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
        options: &MigrateOptions,
        mode: Mode,
    ) -> MigrateResult<TenantMigrationResult> {
        let started = Instant::now();
        let schema = self.manager.schema_name(tenant_id)?;
        let db = self.manager.get_db(tenant_id).await?;
        let mut conn = db.get().await?;

        let tracking = TrackingTable::open(
            &conn,
            &schema,
            &self.settings.migrations_table,
            self.settings.table_format,
            self.settings.default_format,
        )
        .await?;
        let applied = applied_identifiers(&tracking.applied(&conn).await?);
        let pending = pending_files(tracking.format(), files, &applied);

        info!(
            tenant_id = %tenant_id,
            pending = pending.len(),
            format = %tracking.format(),
            "applying migrations"
        );

        let mut applied_names = Vec::new();
        for file in pending {
            self.hooks.fire_before_migration(tenant_id, &file.name);

            if options.dry_run {
                applied_names.push(file.name.clone());
                self.hooks.fire_after_migration(tenant_id, &file.name, true);
                if let Some(progress) = &options.on_progress {
                    progress(tenant_id, &file.name);
                }
                continue;
            }

            match apply_one(&mut conn, &tracking, file, mode).await {
                Ok(()) => {
                    applied_names.push(file.name.clone());
                    self.hooks.fire_after_migration(tenant_id, &file.name, true);
                    if let Some(progress) = &options.on_progress {
                        progress(tenant_id, &file.name);
                    }
                }
                Err(err) => {
                    self.hooks.fire_after_migration(tenant_id, &file.name, false);
                    let error = render_failure(tenant_id, &file.name, err);
                    warn!(
                        tenant_id = %tenant_id,
                        migration = %file.name,
                        error = %error,
                        "migration failed, aborting remaining migrations for tenant"
                    );
                    return Ok(TenantMigrationResult {
                        tenant_id: tenant_id.clone(),
                        success: false,
                        skipped: false,
                        applied_migrations: applied_names,
                        error: Some(error),
                        duration_ms: started.elapsed().as_millis() as u64,
                        format: Some(tracking.format()),
                    });
                }
            }
        }

        Ok(TenantMigrationResult {
            tenant_id: tenant_id.clone(),
            success: true,
            skipped: false,
            applied_migrations: applied_names,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            format: Some(tracking.format()),
        })
    }

    /// Migrate every tenant with bounded concurrency.
    pub async fn migrate_all(
        &self,
        tenant_ids: Vec<TenantId>,
        options: &MigrateAllOptions,
    ) -> MigrateResult<MigrateAllResult> {
        let files = self.load_migrations().await?;
        self.run_all(tenant_ids, &files, options, Mode::Execute).await
    }

    /// Mark every tenant's pending migrations as applied.
    pub async fn mark_all_as_applied(
        &self,
        tenant_ids: Vec<TenantId>,
        options: &MigrateAllOptions,
    ) -> MigrateResult<MigrateAllResult> {
        let files = self.load_migrations().await?;
        self.run_all(tenant_ids, &files, options, Mode::MarkOnly).await
    }

    async fn run_all(
        &self,
        tenant_ids: Vec<TenantId>,
        files: &[MigrationFile],
        options: &MigrateAllOptions,
        mode: Mode,
    ) -> MigrateResult<MigrateAllResult> {
        let concurrency = options
            .concurrency
            .unwrap_or(MigrateAllOptions::DEFAULT_CONCURRENCY);
        let tenant_options = MigrateOptions {
            dry_run: options.dry_run,
            on_progress: options.on_progress.clone(),
        };
        let on_error = options.on_error.clone();

        let tenant_options = &tenant_options;
        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            move |tenant_id, err| match &on_error {
                Some(handler) => handler(tenant_id, err),
                None => ErrorPolicy::Continue,
            },
            move |tenant_id| async move {
                self.run_tenant(&tenant_id, files, tenant_options, mode).await
            },
        )
        .await;

        let summary = BatchSummary::tally(&outcomes, |result: &TenantMigrationResult| {
            result.success
        });
        let details = outcomes
            .into_iter()
            .map(|(tenant_id, outcome)| match outcome {
                TaskOutcome::Done(result) => result,
                TaskOutcome::Failed(err) => {
                    TenantMigrationResult::failed(tenant_id, err.to_string())
                }
                TaskOutcome::Skipped => TenantMigrationResult::skipped(tenant_id),
            })
            .collect();

        Ok(MigrateAllResult { summary, details })
    }

    /// Applied/pending breakdown for one tenant.
    pub async fn tenant_status(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
    ) -> MigrateResult<TenantStatus> {
        let schema = self.manager.schema_name(tenant_id)?;
        let db = self.manager.get_db(tenant_id).await?;
        let conn = db.get().await?;

        let tracking = TrackingTable::open(
            &conn,
            &schema,
            &self.settings.migrations_table,
            self.settings.table_format,
            self.settings.default_format,
        )
        .await?;
        let applied = tracking.applied(&conn).await?;
        let applied_set = applied_identifiers(&applied);
        let pending = pending_files(tracking.format(), files, &applied_set)
            .into_iter()
            .map(|f| f.name.clone())
            .collect();

        Ok(TenantStatus {
            tenant_id: tenant_id.clone(),
            format: tracking.format(),
            applied,
            pending,
        })
    }

    /// Status across tenants with bounded concurrency.
    pub async fn status(
        &self,
        tenant_ids: Vec<TenantId>,
        concurrency: usize,
    ) -> MigrateResult<StatusReport> {
        let files = self.load_migrations().await?;
        let files = &files;
        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            |_, _| ErrorPolicy::Continue,
            move |tenant_id| async move { self.tenant_status(&tenant_id, files).await },
        )
        .await;

        let entries = outcomes
            .into_iter()
            .map(|(tenant_id, outcome)| match outcome {
                TaskOutcome::Done(status) => StatusEntry {
                    tenant_id,
                    status: Some(status),
                    error: None,
                },
                TaskOutcome::Failed(err) => StatusEntry {
                    tenant_id,
                    status: None,
                    error: Some(err.to_string()),
                },
                TaskOutcome::Skipped => StatusEntry {
                    tenant_id,
                    status: None,
                    error: Some(SKIPPED_BY_ABORT.to_string()),
                },
            })
            .collect();

        Ok(StatusReport { entries })
    }
}

impl std::fmt::Debug for TenantMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantMigrator")
            .field("settings", &self.settings)
            .finish()
    }
}

/// Apply one migration in one transaction: SQL first (unless marking), then
/// the tracking row, then commit. Any error rolls both back.
pub(crate) async fn apply_one(
    conn: &mut PgConnection,
    tracking: &TrackingTable,
    file: &MigrationFile,
    mode: Mode,
) -> MigrateResult<()> {
    let tx = conn.transaction().await.map_err(MigrationError::Pg)?;

    if matches!(mode, Mode::Execute) {
        if let Err(err) = tx.batch_execute(&file.sql).await {
            tx.rollback().await.ok();
            return Err(MigrationError::Pg(err));
        }
    }

    if let Err(err) = tracking.insert_in_tx(&tx, file).await {
        tx.rollback().await.ok();
        return Err(err);
    }

    tx.commit().await.map_err(MigrationError::Pg)?;
    Ok(())
}

fn render_failure(tenant_id: &TenantId, migration: &str, err: MigrationError) -> String {
    match err {
        MigrationError::Pg(pg) => {
            MigrationError::migration_failed(tenant_id.as_str(), migration, pg).to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = MigrationSettings::default();
        assert_eq!(settings.migrations_table, "__drizzle_migrations");
        assert_eq!(settings.shared_table, "__drizzle_shared_migrations");
        assert_eq!(settings.table_format, FormatChoice::Auto);
        assert_eq!(settings.default_format, TableFormat::Name);
        assert!(settings.shared_folder.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = MigrationSettings::new().migrations_table("");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_result_constructors() {
        let tenant = TenantId::new("t1").unwrap();

        let skipped = TenantMigrationResult::skipped(tenant.clone());
        assert!(skipped.skipped);
        assert!(!skipped.success);
        assert_eq!(skipped.error.as_deref(), Some(SKIPPED_BY_ABORT));

        let failed = TenantMigrationResult::failed(tenant, "boom".to_string());
        assert!(!failed.skipped);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_describe() {
        let result = MigrateAllResult {
            summary: BatchSummary {
                total: 4,
                succeeded: 2,
                failed: 1,
                skipped: 1,
            },
            details: Vec::new(),
        };
        assert_eq!(
            result.describe(),
            "4 tenants: 2 succeeded, 1 failed, 1 skipped"
        );
    }
}
