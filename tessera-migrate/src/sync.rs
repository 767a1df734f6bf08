//! Disk ↔ tracking-table reconciliation.
//!
//! A tenant is in sync when every migration on disk is recorded and every
//! recorded identifier matches a file. `mark_missing` and `clean_orphans`
//! repair the two directions; each runs in a single transaction per tenant
//! and never executes migration SQL.

use serde::Serialize;
use tessera_core::TenantId;
use tessera_postgres::PoolManager;
use tracing::info;

use crate::batch::{ErrorPolicy, SKIPPED_BY_ABORT, TaskOutcome, run_batched};
use crate::error::MigrateResult;
use crate::executor::MigrationSettings;
use crate::file::{MigrationFile, MigrationLoader};
use crate::format::{
    TableFormat, TrackingTable, applied_identifiers, orphan_identifiers, pending_files,
};

/// Sync state of one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The tracking table's format.
    pub format: TableFormat,
    /// Migrations on disk with no tracking row, in file order.
    pub missing: Vec<String>,
    /// Tracking rows with no matching file.
    pub orphans: Vec<String>,
    /// True when both lists are empty.
    pub in_sync: bool,
}

/// One tenant's entry in a fleet-wide sync report.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEntry {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The status, when it could be computed.
    pub status: Option<SyncStatus>,
    /// Error text otherwise.
    pub error: Option<String>,
}

/// Fleet-wide sync report.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Per-tenant entries, in input order.
    pub entries: Vec<SyncEntry>,
}

impl SyncReport {
    /// Tenants whose status was computed and is out of sync.
    pub fn out_of_sync(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status.as_ref().is_some_and(|s| !s.in_sync))
            .count()
    }

    /// One-line description of the report.
    pub fn describe(&self) -> String {
        format!(
            "{} tenants checked, {} out of sync",
            self.entries.len(),
            self.out_of_sync()
        )
    }
}

/// Result of a sync mutation on one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct SyncMutationReport {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Migration names inserted into the tracking table.
    pub marked_migrations: Vec<String>,
    /// Identifiers deleted from the tracking table.
    pub removed_orphans: Vec<String>,
}

/// Reconciles migration files with tracking tables.
#[derive(Clone, Debug)]
pub struct SyncManager {
    manager: PoolManager,
    settings: MigrationSettings,
}

impl SyncManager {
    /// Create a sync manager.
    pub fn new(manager: PoolManager, settings: MigrationSettings) -> Self {
        Self { manager, settings }
    }

    async fn open_tracking(
        &self,
        tenant_id: &TenantId,
    ) -> MigrateResult<(tessera_postgres::TenantDb, TrackingTable)> {
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
        Ok((db, tracking))
    }

    /// Compute the sync state of one tenant.
    pub async fn sync_status(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
    ) -> MigrateResult<SyncStatus> {
        let (db, tracking) = self.open_tracking(tenant_id).await?;
        let conn = db.get().await?;
        let records = tracking.applied(&conn).await?;
        let applied = applied_identifiers(&records);

        let missing: Vec<String> = pending_files(tracking.format(), files, &applied)
            .into_iter()
            .map(|f| f.name.clone())
            .collect();
        let orphans = orphan_identifiers(tracking.format(), files, &records);
        let in_sync = missing.is_empty() && orphans.is_empty();

        Ok(SyncStatus {
            tenant_id: tenant_id.clone(),
            format: tracking.format(),
            missing,
            orphans,
            in_sync,
        })
    }

    /// Sync state across tenants with bounded concurrency.
    pub async fn sync_status_all(
        &self,
        tenant_ids: Vec<TenantId>,
        concurrency: usize,
    ) -> MigrateResult<SyncReport> {
        let files = MigrationLoader::new(&self.settings.tenant_folder).load().await?;
        let files = &files;
        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            |_, _| ErrorPolicy::Continue,
            move |tenant_id| async move { self.sync_status(&tenant_id, files).await },
        )
        .await;

        let entries = outcomes
            .into_iter()
            .map(|(tenant_id, outcome)| match outcome {
                TaskOutcome::Done(status) => SyncEntry {
                    tenant_id,
                    status: Some(status),
                    error: None,
                },
                TaskOutcome::Failed(err) => SyncEntry {
                    tenant_id,
                    status: None,
                    error: Some(err.to_string()),
                },
                TaskOutcome::Skipped => SyncEntry {
                    tenant_id,
                    status: None,
                    error: Some(SKIPPED_BY_ABORT.to_string()),
                },
            })
            .collect();

        Ok(SyncReport { entries })
    }

    /// Insert tracking rows for every migration on disk that has none.
    ///
    /// No SQL is executed; all inserts share one transaction.
    pub async fn mark_missing(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
    ) -> MigrateResult<SyncMutationReport> {
        let (db, tracking) = self.open_tracking(tenant_id).await?;
        let mut conn = db.get().await?;
        let applied = applied_identifiers(&tracking.applied(&conn).await?);
        let missing = pending_files(tracking.format(), files, &applied);

        let mut marked = Vec::with_capacity(missing.len());
        if !missing.is_empty() {
            let tx = conn.transaction().await.map_err(crate::error::MigrationError::Pg)?;
            for file in missing {
                tracking.insert_in_tx(&tx, file).await?;
                marked.push(file.name.clone());
            }
            tx.commit().await.map_err(crate::error::MigrationError::Pg)?;
        }

        info!(tenant_id = %tenant_id, marked = marked.len(), "marked missing migrations");
        Ok(SyncMutationReport {
            tenant_id: tenant_id.clone(),
            marked_migrations: marked,
            removed_orphans: Vec::new(),
        })
    }

    /// Delete tracking rows whose identifier matches no file on disk.
    pub async fn clean_orphans(
        &self,
        tenant_id: &TenantId,
        files: &[MigrationFile],
    ) -> MigrateResult<SyncMutationReport> {
        let (db, tracking) = self.open_tracking(tenant_id).await?;
        let mut conn = db.get().await?;
        let records = tracking.applied(&conn).await?;
        let orphans = orphan_identifiers(tracking.format(), files, &records);

        if !orphans.is_empty() {
            let tx = conn.transaction().await.map_err(crate::error::MigrationError::Pg)?;
            tracking.delete_in_tx(&tx, &orphans).await?;
            tx.commit().await.map_err(crate::error::MigrationError::Pg)?;
        }

        info!(tenant_id = %tenant_id, removed = orphans.len(), "cleaned orphan rows");
        Ok(SyncMutationReport {
            tenant_id: tenant_id.clone(),
            marked_migrations: Vec::new(),
            removed_orphans: orphans,
        })
    }

    /// Run [`Self::mark_missing`] across tenants.
    pub async fn mark_all_missing(
        &self,
        tenant_ids: Vec<TenantId>,
        concurrency: usize,
    ) -> MigrateResult<Vec<(TenantId, MigrateResult<SyncMutationReport>)>> {
        let files = MigrationLoader::new(&self.settings.tenant_folder).load().await?;
        let files = &files;
        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            |_, _| ErrorPolicy::Continue,
            move |tenant_id| async move { self.mark_missing(&tenant_id, files).await },
        )
        .await;
        Ok(collapse(outcomes))
    }

    /// Run [`Self::clean_orphans`] across tenants.
    pub async fn clean_all_orphans(
        &self,
        tenant_ids: Vec<TenantId>,
        concurrency: usize,
    ) -> MigrateResult<Vec<(TenantId, MigrateResult<SyncMutationReport>)>> {
        let files = MigrationLoader::new(&self.settings.tenant_folder).load().await?;
        let files = &files;
        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            |_, _| ErrorPolicy::Continue,
            move |tenant_id| async move { self.clean_orphans(&tenant_id, files).await },
        )
        .await;
        Ok(collapse(outcomes))
    }
}

fn collapse<R>(
    outcomes: Vec<(TenantId, TaskOutcome<R, crate::error::MigrationError>)>,
) -> Vec<(TenantId, MigrateResult<R>)> {
    outcomes
        .into_iter()
        .filter_map(|(tenant_id, outcome)| match outcome {
            TaskOutcome::Done(report) => Some((tenant_id, Ok(report))),
            TaskOutcome::Failed(err) => Some((tenant_id, Err(err))),
            TaskOutcome::Skipped => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_describe() {
        let t1 = TenantId::new("t1").unwrap();
        let report = SyncReport {
            entries: vec![
                SyncEntry {
                    tenant_id: t1.clone(),
                    status: Some(SyncStatus {
                        tenant_id: t1.clone(),
                        format: TableFormat::Name,
                        missing: vec!["0002_b".to_string()],
                        orphans: Vec::new(),
                        in_sync: false,
                    }),
                    error: None,
                },
                SyncEntry {
                    tenant_id: TenantId::new("t2").unwrap(),
                    status: None,
                    error: Some("boom".to_string()),
                },
            ],
        };

        assert_eq!(report.out_of_sync(), 1);
        assert_eq!(report.describe(), "2 tenants checked, 1 out of sync");
    }
}
