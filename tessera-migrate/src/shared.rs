//! Shared-schema migrations.
//!
//! The shared namespace carries cross-tenant reference data and its own
//! tracking table, independent of every tenant's. A shared migration
//! applies once globally, over the shared pool (which is never evicted).

use std::time::Instant;

use serde::Serialize;
use tessera_postgres::PoolManager;
use tracing::{info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{MigrationSettings, Mode, apply_one};
use crate::file::{MigrationFile, MigrationLoader};
use crate::format::{
    AppliedMigration, TableFormat, TrackingTable, applied_identifiers, pending_files,
};

/// Result of a shared-schema migration run.
#[derive(Debug, Clone, Serialize)]
pub struct SharedMigrationResult {
    /// Whether every pending migration committed.
    pub success: bool,
    /// Names of migrations that committed during this run, in order.
    pub applied_migrations: Vec<String>,
    /// Error text when `success` is false.
    pub error: Option<String>,
    /// Wall-clock time.
    pub duration_ms: u64,
    /// The tracking table's format.
    pub format: Option<TableFormat>,
}

/// Applied/pending breakdown for the shared schema.
#[derive(Debug, Clone, Serialize)]
pub struct SharedStatus {
    /// The tracking table's format.
    pub format: TableFormat,
    /// Rows recorded in the tracking table, in insertion order.
    pub applied: Vec<AppliedMigration>,
    /// Names of migrations on disk not yet applied, in order.
    pub pending: Vec<String>,
}

/// Applies migrations to the shared schema.
#[derive(Clone, Debug)]
pub struct SharedMigrator {
    manager: PoolManager,
    settings: MigrationSettings,
}

impl SharedMigrator {
    /// Create a shared migrator.
    pub fn new(manager: PoolManager, settings: MigrationSettings) -> Self {
        Self { manager, settings }
    }

    /// Load the shared migration folder.
    ///
    /// The folder is optional: when unconfigured or absent there is simply
    /// nothing to apply.
    pub async fn load_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        match &self.settings.shared_folder {
            Some(folder) => MigrationLoader::new(folder).optional(true).load().await,
            None => Ok(Vec::new()),
        }
    }

    /// Apply all pending shared migrations.
    pub async fn migrate(&self, dry_run: bool) -> MigrateResult<SharedMigrationResult> {
        self.run(dry_run, Mode::Execute).await
    }

    /// Record all pending shared migrations without executing SQL.
    pub async fn mark_as_applied(&self) -> MigrateResult<SharedMigrationResult> {
        self.run(false, Mode::MarkOnly).await
    }

    async fn run(&self, dry_run: bool, mode: Mode) -> MigrateResult<SharedMigrationResult> {
        let started = Instant::now();
        let files = self.load_migrations().await?;
        let db = self.manager.get_shared_db().await?;
        let mut conn = db.get().await?;
        let schema = self.manager.shared_schema();

        let tracking = TrackingTable::open(
            &conn,
            schema,
            &self.settings.shared_table,
            self.settings.table_format,
            self.settings.default_format,
        )
        .await?;
        let applied = applied_identifiers(&tracking.applied(&conn).await?);
        let pending = pending_files(tracking.format(), &files, &applied);

        info!(
            schema = %schema,
            pending = pending.len(),
            "applying shared migrations"
        );

        let mut applied_names = Vec::new();
        for file in pending {
            if dry_run {
                applied_names.push(file.name.clone());
                continue;
            }
            if let Err(err) = apply_one(&mut conn, &tracking, file, mode).await {
                let error = match err {
                    MigrationError::Pg(pg) => {
                        MigrationError::migration_failed(schema.as_str(), &file.name, pg)
                            .to_string()
                    }
                    other => other.to_string(),
                };
                warn!(
                    migration = %file.name,
                    error = %error,
                    "shared migration failed, aborting remaining migrations"
                );
                return Ok(SharedMigrationResult {
                    success: false,
                    applied_migrations: applied_names,
                    error: Some(error),
                    duration_ms: started.elapsed().as_millis() as u64,
                    format: Some(tracking.format()),
                });
            }
            applied_names.push(file.name.clone());
        }

        Ok(SharedMigrationResult {
            success: true,
            applied_migrations: applied_names,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            format: Some(tracking.format()),
        })
    }

    /// Applied/pending breakdown for the shared schema.
    pub async fn status(&self) -> MigrateResult<SharedStatus> {
        let files = self.load_migrations().await?;
        let db = self.manager.get_shared_db().await?;
        let conn = db.get().await?;
        let schema = self.manager.shared_schema();

        let tracking = TrackingTable::open(
            &conn,
            schema,
            &self.settings.shared_table,
            self.settings.table_format,
            self.settings.default_format,
        )
        .await?;
        let applied = tracking.applied(&conn).await?;
        let applied_set = applied_identifiers(&applied);
        let pending = pending_files(tracking.format(), &files, &applied_set)
            .into_iter()
            .map(|f| f.name.clone())
            .collect();

        Ok(SharedStatus {
            format: tracking.format(),
            applied,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_shape() {
        let result = SharedMigrationResult {
            success: true,
            applied_migrations: vec!["0001_reference_data".to_string()],
            error: None,
            duration_ms: 12,
            format: Some(TableFormat::Name),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["format"], "name");
        assert_eq!(json["applied_migrations"][0], "0001_reference_data");
    }
}
