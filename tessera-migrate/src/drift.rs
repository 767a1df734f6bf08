//! Structural drift detection between tenant schemas.
//!
//! One tenant is introspected as the reference; every other tenant's
//! snapshot is diffed against it. Comparison is structural - column
//! shapes, index column sets and uniqueness, constraint column sets -
//! never raw DDL strings.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_core::TenantId;
use tessera_postgres::PoolManager;
use tracing::{info, warn};

use crate::batch::{ErrorPolicy, TaskOutcome, run_batched};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::MigrationSettings;
use crate::introspect::{
    ColumnSnapshot, IntrospectOptions, SchemaSnapshot, TableSnapshot, introspect_schema,
};

/// Kinds of per-column drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDriftKind {
    /// Column exists on the reference but not here.
    Missing,
    /// Column exists here but not on the reference.
    Extra,
    /// Data types differ.
    TypeMismatch,
    /// Nullability differs.
    NullableMismatch,
    /// Defaults differ after normalization.
    DefaultMismatch,
}

/// One column-level difference.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDrift {
    /// The column.
    pub column: String,
    /// What differs.
    #[serde(rename = "type")]
    pub kind: ColumnDriftKind,
    /// The reference side's value, when applicable.
    pub expected: Option<String>,
    /// This tenant's value, when applicable.
    pub actual: Option<String>,
}

/// Kinds of index/constraint drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectDriftKind {
    /// Present on the reference only.
    Missing,
    /// Present on this tenant only.
    Extra,
    /// Same name, different structure.
    DefinitionMismatch,
}

/// One index- or constraint-level difference.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectDrift {
    /// The index or constraint name.
    pub name: String,
    /// What differs.
    #[serde(rename = "type")]
    pub kind: ObjectDriftKind,
    /// Human-readable detail for mismatches.
    pub detail: Option<String>,
}

/// Classification of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Table exists on the reference but not here.
    Missing,
    /// Table exists here but not on the reference.
    Extra,
    /// Table exists on both sides with differences.
    Drifted,
}

/// One table's drift entry. Tables that match are not listed.
#[derive(Debug, Clone, Serialize)]
pub struct TableDrift {
    /// The table.
    pub table: String,
    /// Classification.
    pub status: TableStatus,
    /// Column differences, for drifted tables.
    pub columns: Vec<ColumnDrift>,
    /// Index differences, for drifted tables.
    pub indexes: Vec<ObjectDrift>,
    /// Constraint differences, for drifted tables.
    pub constraints: Vec<ObjectDrift>,
}

impl TableDrift {
    fn issue_count(&self) -> usize {
        match self.status {
            TableStatus::Missing | TableStatus::Extra => 1,
            TableStatus::Drifted => {
                self.columns.len() + self.indexes.len() + self.constraints.len()
            }
        }
    }
}

/// Drift findings for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantDrift {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Whether anything differs from the reference.
    pub has_drift: bool,
    /// Total number of individual differences.
    pub issue_count: usize,
    /// Tables with differences.
    pub tables: Vec<TableDrift>,
    /// Error text when introspection failed; `tables` is empty then.
    pub error: Option<String>,
}

impl TenantDrift {
    fn clean(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            has_drift: false,
            issue_count: 0,
            tables: Vec::new(),
            error: None,
        }
    }

    fn errored(tenant_id: TenantId, error: String) -> Self {
        Self {
            tenant_id,
            has_drift: false,
            issue_count: 0,
            tables: Vec::new(),
            error: Some(error),
        }
    }
}

/// Fleet-wide drift report.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// The tenant everything was compared against.
    pub reference_tenant: TenantId,
    /// Tenants with no drift (the reference included).
    pub no_drift: usize,
    /// Tenants with drift.
    pub with_drift: usize,
    /// Tenants whose introspection failed.
    pub errors: usize,
    /// Per-tenant details; the reference comes first.
    pub details: Vec<TenantDrift>,
    /// When the detection ran.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time.
    pub duration_ms: u64,
}

impl DriftReport {
    /// One-line description of the report.
    pub fn describe(&self) -> String {
        format!(
            "{} tenants compared against '{}': {} clean, {} drifted, {} errored",
            self.details.len(),
            self.reference_tenant,
            self.no_drift,
            self.with_drift,
            self.errors
        )
    }
}

/// Options for a drift run.
#[derive(Debug, Clone)]
pub struct DriftOptions {
    /// Tenant to compare against; defaults to the first tenant.
    pub reference_tenant: Option<TenantId>,
    /// Tenants to compare; defaults to every discovered tenant.
    pub tenant_ids: Option<Vec<TenantId>>,
    /// Tenants introspected concurrently per batch.
    pub concurrency: usize,
    /// Compare indexes.
    pub include_indexes: bool,
    /// Compare constraints.
    pub include_constraints: bool,
    /// Extra table names to skip, beyond the tracking table.
    pub exclude_tables: Vec<String>,
}

impl Default for DriftOptions {
    fn default() -> Self {
        Self {
            reference_tenant: None,
            tenant_ids: None,
            concurrency: 10,
            include_indexes: true,
            include_constraints: true,
            exclude_tables: Vec::new(),
        }
    }
}

/// Detects structural drift across the tenant fleet.
#[derive(Clone, Debug)]
pub struct DriftDetector {
    manager: PoolManager,
    settings: MigrationSettings,
}

impl DriftDetector {
    /// Create a drift detector.
    pub fn new(manager: PoolManager, settings: MigrationSettings) -> Self {
        Self { manager, settings }
    }

    fn introspect_options(&self, options: &DriftOptions) -> IntrospectOptions {
        let mut exclude = vec![self.settings.migrations_table.clone()];
        exclude.extend(options.exclude_tables.iter().cloned());
        IntrospectOptions {
            include_indexes: options.include_indexes,
            include_constraints: options.include_constraints,
            exclude_tables: exclude,
        }
    }

    /// Introspect one tenant's schema.
    pub async fn introspect_tenant(
        &self,
        tenant_id: &TenantId,
        options: &IntrospectOptions,
    ) -> MigrateResult<SchemaSnapshot> {
        let schema = self.manager.schema_name(tenant_id)?;
        let db = self.manager.get_db(tenant_id).await?;
        let conn = db.get().await?;
        match introspect_schema(&conn, &schema, options).await {
            Ok(snapshot) => Ok(snapshot),
            Err(MigrationError::Pg(pg)) => {
                Err(MigrationError::introspection_failed(tenant_id.as_str(), pg))
            }
            Err(other) => Err(other),
        }
    }

    /// Compare every tenant against a reference tenant.
    pub async fn detect(
        &self,
        discovered: Vec<TenantId>,
        options: &DriftOptions,
    ) -> MigrateResult<DriftReport> {
        let started = Instant::now();
        let tenant_ids = options.tenant_ids.clone().unwrap_or(discovered);
        if tenant_ids.is_empty() {
            return Err(MigrationError::NoTenants);
        }

        let reference_tenant = options
            .reference_tenant
            .clone()
            .unwrap_or_else(|| tenant_ids[0].clone());
        let introspect_options = self.introspect_options(options);

        info!(reference = %reference_tenant, tenants = tenant_ids.len(), "detecting drift");
        let reference = self
            .introspect_tenant(&reference_tenant, &introspect_options)
            .await?;

        let targets: Vec<TenantId> = tenant_ids
            .into_iter()
            .filter(|id| *id != reference_tenant)
            .collect();

        let reference_ref = &reference;
        let introspect_ref = &introspect_options;
        let options_ref = options;
        let outcomes = run_batched(
            targets,
            options.concurrency,
            |_, _| ErrorPolicy::Continue,
            move |tenant_id| async move {
                let snapshot = self
                    .introspect_tenant(&tenant_id, introspect_ref)
                    .await?;
                let tables = diff_snapshots(reference_ref, &snapshot, options_ref);
                let issue_count = tables.iter().map(TableDrift::issue_count).sum();
                Ok::<_, MigrationError>(TenantDrift {
                    tenant_id,
                    has_drift: issue_count > 0,
                    issue_count,
                    tables,
                    error: None,
                })
            },
        )
        .await;

        let mut details = vec![TenantDrift::clean(reference_tenant.clone())];
        for (tenant_id, outcome) in outcomes {
            match outcome {
                TaskOutcome::Done(drift) => details.push(drift),
                TaskOutcome::Failed(err) => {
                    warn!(tenant_id = %tenant_id, error = %err, "drift introspection failed");
                    details.push(TenantDrift::errored(tenant_id, err.to_string()));
                }
                TaskOutcome::Skipped => unreachable!("drift fan-out never aborts"),
            }
        }

        let errors = details.iter().filter(|d| d.error.is_some()).count();
        let with_drift = details.iter().filter(|d| d.has_drift).count();
        let no_drift = details.len() - errors - with_drift;

        Ok(DriftReport {
            reference_tenant,
            no_drift,
            with_drift,
            errors,
            details,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Diff a tenant snapshot against the reference snapshot.
///
/// Returns entries only for tables that differ.
pub fn diff_snapshots(
    reference: &SchemaSnapshot,
    actual: &SchemaSnapshot,
    options: &DriftOptions,
) -> Vec<TableDrift> {
    let mut drifts = Vec::new();

    for ref_table in &reference.tables {
        match actual.table(&ref_table.name) {
            None => drifts.push(TableDrift {
                table: ref_table.name.clone(),
                status: TableStatus::Missing,
                columns: Vec::new(),
                indexes: Vec::new(),
                constraints: Vec::new(),
            }),
            Some(actual_table) => {
                let drift = diff_table(ref_table, actual_table, options);
                if let Some(drift) = drift {
                    drifts.push(drift);
                }
            }
        }
    }

    for actual_table in &actual.tables {
        if reference.table(&actual_table.name).is_none() {
            drifts.push(TableDrift {
                table: actual_table.name.clone(),
                status: TableStatus::Extra,
                columns: Vec::new(),
                indexes: Vec::new(),
                constraints: Vec::new(),
            });
        }
    }

    drifts
}

fn diff_table(
    reference: &TableSnapshot,
    actual: &TableSnapshot,
    options: &DriftOptions,
) -> Option<TableDrift> {
    let mut columns = Vec::new();

    for ref_column in &reference.columns {
        match actual.column(&ref_column.name) {
            None => columns.push(ColumnDrift {
                column: ref_column.name.clone(),
                kind: ColumnDriftKind::Missing,
                expected: Some(render_type(ref_column)),
                actual: None,
            }),
            Some(actual_column) => {
                columns.extend(diff_column(ref_column, actual_column));
            }
        }
    }

    for actual_column in &actual.columns {
        if reference.column(&actual_column.name).is_none() {
            columns.push(ColumnDrift {
                column: actual_column.name.clone(),
                kind: ColumnDriftKind::Extra,
                expected: None,
                actual: Some(render_type(actual_column)),
            });
        }
    }

    let indexes = if options.include_indexes {
        diff_indexes(reference, actual)
    } else {
        Vec::new()
    };
    let constraints = if options.include_constraints {
        diff_constraints(reference, actual)
    } else {
        Vec::new()
    };

    if columns.is_empty() && indexes.is_empty() && constraints.is_empty() {
        return None;
    }
    Some(TableDrift {
        table: reference.name.clone(),
        status: TableStatus::Drifted,
        columns,
        indexes,
        constraints,
    })
}

fn diff_column(reference: &ColumnSnapshot, actual: &ColumnSnapshot) -> Vec<ColumnDrift> {
    let mut drifts = Vec::new();

    if !same_type(reference, actual) {
        drifts.push(ColumnDrift {
            column: reference.name.clone(),
            kind: ColumnDriftKind::TypeMismatch,
            expected: Some(render_type(reference)),
            actual: Some(render_type(actual)),
        });
    }

    if reference.is_nullable != actual.is_nullable {
        drifts.push(ColumnDrift {
            column: reference.name.clone(),
            kind: ColumnDriftKind::NullableMismatch,
            expected: Some(reference.is_nullable.to_string()),
            actual: Some(actual.is_nullable.to_string()),
        });
    }

    let ref_default = reference.column_default.as_deref().map(normalize_default);
    let actual_default = actual.column_default.as_deref().map(normalize_default);
    if ref_default != actual_default {
        drifts.push(ColumnDrift {
            column: reference.name.clone(),
            kind: ColumnDriftKind::DefaultMismatch,
            expected: ref_default,
            actual: actual_default,
        });
    }

    drifts
}

fn same_type(a: &ColumnSnapshot, b: &ColumnSnapshot) -> bool {
    a.data_type == b.data_type
        && a.udt_name == b.udt_name
        && a.character_maximum_length == b.character_maximum_length
        && a.numeric_precision == b.numeric_precision
        && a.numeric_scale == b.numeric_scale
}

fn render_type(column: &ColumnSnapshot) -> String {
    match column.character_maximum_length {
        Some(len) => format!("{}({})", column.data_type, len),
        None => column.data_type.clone(),
    }
}

fn diff_indexes(reference: &TableSnapshot, actual: &TableSnapshot) -> Vec<ObjectDrift> {
    let mut drifts = Vec::new();

    for ref_index in &reference.indexes {
        match actual.indexes.iter().find(|i| i.name == ref_index.name) {
            None => drifts.push(ObjectDrift {
                name: ref_index.name.clone(),
                kind: ObjectDriftKind::Missing,
                detail: None,
            }),
            Some(actual_index) => {
                // Structural comparison: column set, uniqueness, method.
                if ref_index.columns != actual_index.columns
                    || ref_index.is_unique != actual_index.is_unique
                    || ref_index.method != actual_index.method
                {
                    drifts.push(ObjectDrift {
                        name: ref_index.name.clone(),
                        kind: ObjectDriftKind::DefinitionMismatch,
                        detail: Some(format!(
                            "expected {:?} (unique: {}, {}), got {:?} (unique: {}, {})",
                            ref_index.columns,
                            ref_index.is_unique,
                            ref_index.method,
                            actual_index.columns,
                            actual_index.is_unique,
                            actual_index.method
                        )),
                    });
                }
            }
        }
    }

    for actual_index in &actual.indexes {
        if !reference.indexes.iter().any(|i| i.name == actual_index.name) {
            drifts.push(ObjectDrift {
                name: actual_index.name.clone(),
                kind: ObjectDriftKind::Extra,
                detail: None,
            });
        }
    }

    drifts
}

fn diff_constraints(reference: &TableSnapshot, actual: &TableSnapshot) -> Vec<ObjectDrift> {
    let mut drifts = Vec::new();

    for ref_constraint in &reference.constraints {
        match actual
            .constraints
            .iter()
            .find(|c| c.name == ref_constraint.name)
        {
            None => drifts.push(ObjectDrift {
                name: ref_constraint.name.clone(),
                kind: ObjectDriftKind::Missing,
                detail: None,
            }),
            Some(actual_constraint) => {
                if ref_constraint.constraint_type != actual_constraint.constraint_type
                    || ref_constraint.columns != actual_constraint.columns
                    || ref_constraint.referenced_table != actual_constraint.referenced_table
                {
                    drifts.push(ObjectDrift {
                        name: ref_constraint.name.clone(),
                        kind: ObjectDriftKind::DefinitionMismatch,
                        detail: Some(format!(
                            "expected {} on {:?}, got {} on {:?}",
                            ref_constraint.constraint_type,
                            ref_constraint.columns,
                            actual_constraint.constraint_type,
                            actual_constraint.columns
                        )),
                    });
                }
            }
        }
    }

    for actual_constraint in &actual.constraints {
        if !reference
            .constraints
            .iter()
            .any(|c| c.name == actual_constraint.name)
        {
            drifts.push(ObjectDrift {
                name: actual_constraint.name.clone(),
                kind: ObjectDriftKind::Extra,
                detail: None,
            });
        }
    }

    drifts
}

/// Normalize a default expression before comparison.
///
/// Strips trailing `::type` casts and surrounding whitespace, so
/// `'active'::character varying` equals `'active'`.
pub fn normalize_default(default: &str) -> String {
    let mut s = default.trim();
    while let Some(pos) = s.rfind("::") {
        let cast = &s[pos + 2..];
        let looks_like_type = !cast.is_empty()
            && cast.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | '[' | ']')
            });
        if !looks_like_type {
            break;
        }
        s = s[..pos].trim_end();
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, nullable: bool) -> ColumnSnapshot {
        ColumnSnapshot {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: data_type.to_string(),
            is_nullable: nullable,
            column_default: None,
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
            ordinal_position: 0,
        }
    }

    fn table(name: &str, columns: Vec<ColumnSnapshot>) -> TableSnapshot {
        TableSnapshot {
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    fn snapshot(schema: &str, tables: Vec<TableSnapshot>) -> SchemaSnapshot {
        SchemaSnapshot {
            schema: schema.to_string(),
            tables,
        }
    }

    #[test]
    fn test_normalize_default() {
        assert_eq!(normalize_default("'active'::character varying"), "'active'");
        assert_eq!(normalize_default("  now() "), "now()");
        assert_eq!(normalize_default("1::integer"), "1");
        assert_eq!(normalize_default("'a::b'"), "'a::b'");
        assert_eq!(
            normalize_default("'x'::character varying::text"),
            "'x'"
        );
    }

    #[test]
    fn test_identical_snapshots_have_no_drift() {
        let a = snapshot(
            "tenant_a",
            vec![table("users", vec![column("id", "uuid", false)])],
        );
        let drifts = diff_snapshots(&a, &a, &DriftOptions::default());
        assert!(drifts.is_empty());
    }

    #[test]
    fn test_nullable_and_extra_column_drift() {
        // Reference: users(id uuid pk, email varchar(255) not null).
        // Target: users(id, email nullable, phone text).
        let mut email_ref = column("email", "character varying", false);
        email_ref.character_maximum_length = Some(255);
        let mut email_act = column("email", "character varying", true);
        email_act.character_maximum_length = Some(255);

        let reference = snapshot(
            "tenant_ref",
            vec![table("users", vec![column("id", "uuid", false), email_ref])],
        );
        let actual = snapshot(
            "tenant_t2",
            vec![table(
                "users",
                vec![
                    column("id", "uuid", false),
                    email_act,
                    column("phone", "text", true),
                ],
            )],
        );

        let drifts = diff_snapshots(&reference, &actual, &DriftOptions::default());
        assert_eq!(drifts.len(), 1);
        let users = &drifts[0];
        assert_eq!(users.status, TableStatus::Drifted);
        assert_eq!(users.issue_count(), 2);

        let nullable = users
            .columns
            .iter()
            .find(|c| c.kind == ColumnDriftKind::NullableMismatch)
            .unwrap();
        assert_eq!(nullable.column, "email");
        assert_eq!(nullable.expected.as_deref(), Some("false"));
        assert_eq!(nullable.actual.as_deref(), Some("true"));

        let extra = users
            .columns
            .iter()
            .find(|c| c.kind == ColumnDriftKind::Extra)
            .unwrap();
        assert_eq!(extra.column, "phone");
        assert_eq!(extra.actual.as_deref(), Some("text"));
    }

    #[test]
    fn test_missing_and_extra_tables() {
        let reference = snapshot("a", vec![table("users", vec![]), table("orders", vec![])]);
        let actual = snapshot("b", vec![table("users", vec![]), table("audit", vec![])]);

        let drifts = diff_snapshots(&reference, &actual, &DriftOptions::default());
        let missing: Vec<_> = drifts
            .iter()
            .filter(|d| d.status == TableStatus::Missing)
            .map(|d| d.table.as_str())
            .collect();
        let extra: Vec<_> = drifts
            .iter()
            .filter(|d| d.status == TableStatus::Extra)
            .map(|d| d.table.as_str())
            .collect();
        assert_eq!(missing, ["orders"]);
        assert_eq!(extra, ["audit"]);
    }

    #[test]
    fn test_drift_symmetry() {
        let a = snapshot(
            "a",
            vec![table(
                "users",
                vec![column("id", "uuid", false), column("email", "text", false)],
            )],
        );
        let b = snapshot(
            "b",
            vec![table(
                "users",
                vec![column("id", "uuid", false), column("email", "text", true)],
            )],
        );

        let options = DriftOptions::default();
        let forward = diff_snapshots(&a, &b, &options);
        let backward = diff_snapshots(&b, &a, &options);

        let drifted = |d: &[TableDrift]| {
            d.iter()
                .filter(|t| t.status == TableStatus::Drifted)
                .count()
        };
        assert_eq!(drifted(&forward), drifted(&backward));
    }

    #[test]
    fn test_default_mismatch_after_normalization() {
        let mut with_cast = column("status", "text", false);
        with_cast.column_default = Some("'active'::text".to_string());
        let mut bare = column("status", "text", false);
        bare.column_default = Some("'active'".to_string());
        let mut different = column("status", "text", false);
        different.column_default = Some("'inactive'".to_string());

        // Same default modulo cast: no drift.
        assert!(diff_column(&with_cast, &bare).is_empty());
        // Genuinely different defaults drift.
        let drifts = diff_column(&with_cast, &different);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].kind, ColumnDriftKind::DefaultMismatch);
    }

    #[test]
    fn test_index_structural_comparison() {
        use crate::introspect::IndexSnapshot;

        let mut reference = table("users", vec![]);
        reference.indexes.push(IndexSnapshot {
            name: "users_email_idx".to_string(),
            columns: vec!["email".to_string()],
            is_unique: true,
            is_primary: false,
            method: "btree".to_string(),
        });

        let mut actual = table("users", vec![]);
        actual.indexes.push(IndexSnapshot {
            name: "users_email_idx".to_string(),
            columns: vec!["email".to_string()],
            is_unique: false,
            is_primary: false,
            method: "btree".to_string(),
        });

        let drifts = diff_indexes(&reference, &actual);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].kind, ObjectDriftKind::DefinitionMismatch);
        assert!(drifts[0].detail.as_deref().unwrap().contains("unique"));
    }
}
