//! Migration engine behavior that does not need a live cluster: file
//! discovery, identifier bookkeeping, fan-out semantics, and drift
//! classification.

use std::collections::HashSet;

use tessera::migrate::{
    BatchSummary, ColumnDriftKind, ColumnSnapshot, DriftOptions, ErrorPolicy, MigrationFile,
    MigrationLoader, SchemaSnapshot, TableFormat, TableSnapshot, TableStatus, TaskOutcome,
    applied_identifiers, diff_snapshots, orphan_identifiers, pending_files, run_batched,
};
use tessera::TenantId;

async fn write_migrations(dir: &std::path::Path, files: &[(&str, &str)]) {
    for (name, sql) in files {
        tokio::fs::write(dir.join(name), sql).await.unwrap();
    }
}

#[tokio::test]
async fn fresh_fleet_has_all_migrations_pending() {
    // Scenario: two files on disk, nothing applied yet.
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[
            ("0001_init.sql", "CREATE TABLE users (id uuid PRIMARY KEY);"),
            ("0002_add_users.sql", "ALTER TABLE users ADD COLUMN email text;"),
        ],
    )
    .await;

    let files = MigrationLoader::new(dir.path()).load().await.unwrap();
    let pending = pending_files(TableFormat::Name, &files, &HashSet::new());
    let names: Vec<_> = pending.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["0001_init", "0002_add_users"]);
}

#[tokio::test]
async fn applied_rows_shrink_the_pending_set() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[
            ("0001_init.sql", "SELECT 1;"),
            ("0002_add_users.sql", "SELECT 2;"),
            ("0003_views.sql", "SELECT 3;"),
        ],
    )
    .await;

    let files = MigrationLoader::new(dir.path()).load().await.unwrap();
    let applied: HashSet<String> = ["0001_init", "0002_add_users"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let pending = pending_files(TableFormat::Name, &files, &applied);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "0003_views");

    // Idempotence: with everything applied, nothing is pending.
    let all: HashSet<String> = files.iter().map(|f| f.name.clone()).collect();
    assert!(pending_files(TableFormat::Name, &files, &all).is_empty());
}

#[test]
fn sync_sets_reconstruct_the_disk_state() {
    // Scenario: disk has 0001..0003, tracking has 0001 and 0099.
    let file = |name: &str| MigrationFile::from_content(name, "/m", "SELECT 1;").unwrap();
    let files = vec![file("0001_a"), file("0002_b"), file("0003_c")];
    let records = vec![
        tessera::migrate::AppliedMigration {
            identifier: "0001_a".into(),
            applied_at: None,
        },
        tessera::migrate::AppliedMigration {
            identifier: "0099_x".into(),
            applied_at: None,
        },
    ];

    let applied = applied_identifiers(&records);
    let missing: Vec<_> = pending_files(TableFormat::Name, &files, &applied)
        .iter()
        .map(|f| f.name.clone())
        .collect();
    let orphans = orphan_identifiers(TableFormat::Name, &files, &records);

    assert_eq!(missing, ["0002_b", "0003_c"]);
    assert_eq!(orphans, ["0099_x"]);

    // After marking missing and cleaning orphans the tenant is in sync.
    let mut repaired = applied.clone();
    repaired.extend(missing);
    repaired.retain(|id| !orphans.contains(id));
    assert!(pending_files(TableFormat::Name, &files, &repaired).is_empty());
}

#[tokio::test]
async fn abort_policy_reports_skipped_tenants() {
    let ids: Vec<TenantId> = ["t1", "t2", "t3", "t4"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

    let outcomes = run_batched(ids, 1, |_, _: &String| ErrorPolicy::Abort, |id| async move {
        if id.as_str() == "t2" {
            Err("ERROR: division by zero".to_string())
        } else {
            Ok(id)
        }
    })
    .await;

    let summary = BatchSummary::tally(&outcomes, |_| true);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 2);
    assert!(matches!(outcomes[3].1, TaskOutcome::Skipped));
}

fn column(name: &str, data_type: &str, nullable: bool) -> ColumnSnapshot {
    ColumnSnapshot {
        name: name.into(),
        data_type: data_type.into(),
        udt_name: data_type.into(),
        is_nullable: nullable,
        column_default: None,
        character_maximum_length: None,
        numeric_precision: None,
        numeric_scale: None,
        ordinal_position: 0,
    }
}

#[test]
fn drift_report_matches_the_reference_shape() {
    // Reference has users(id, email not null); target adds phone and
    // relaxes email.
    let reference = SchemaSnapshot {
        schema: "tenant_ref".into(),
        tables: vec![TableSnapshot {
            name: "users".into(),
            columns: vec![column("id", "uuid", false), column("email", "text", false)],
            indexes: vec![],
            constraints: vec![],
        }],
    };
    let target = SchemaSnapshot {
        schema: "tenant_t2".into(),
        tables: vec![TableSnapshot {
            name: "users".into(),
            columns: vec![
                column("id", "uuid", false),
                column("email", "text", true),
                column("phone", "text", true),
            ],
            indexes: vec![],
            constraints: vec![],
        }],
    };

    let drifts = diff_snapshots(&reference, &target, &DriftOptions::default());
    assert_eq!(drifts.len(), 1);
    assert_eq!(drifts[0].status, TableStatus::Drifted);

    let kinds: Vec<_> = drifts[0].columns.iter().map(|c| c.kind).collect();
    assert!(kinds.contains(&ColumnDriftKind::NullableMismatch));
    assert!(kinds.contains(&ColumnDriftKind::Extra));
    assert_eq!(drifts[0].columns.len(), 2);
}

#[test]
fn drift_json_uses_wire_casing() {
    let drift = tessera::migrate::ColumnDrift {
        column: "email".into(),
        kind: ColumnDriftKind::NullableMismatch,
        expected: Some("false".into()),
        actual: Some("true".into()),
    };
    let json = serde_json::to_value(&drift).unwrap();
    assert_eq!(json["type"], "nullable_mismatch");
    assert_eq!(json["column"], "email");
}
