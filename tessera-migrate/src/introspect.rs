//! Live schema introspection.
//!
//! Builds a transient snapshot of one namespace - tables, columns,
//! indexes, constraints - from the catalog. Snapshots feed drift
//! detection and are never persisted.

use serde::Serialize;
use tessera_core::SchemaName;
use tessera_postgres::PgConnection;
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};

/// Column description after introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSnapshot {
    /// Column name.
    pub name: String,
    /// Data type (e.g. "integer", "character varying").
    pub data_type: String,
    /// Underlying type name (e.g. "int4", "varchar").
    pub udt_name: String,
    /// Whether the column is nullable.
    pub is_nullable: bool,
    /// Default value expression, as stored.
    pub column_default: Option<String>,
    /// Character maximum length (varchar and friends).
    pub character_maximum_length: Option<i32>,
    /// Numeric precision.
    pub numeric_precision: Option<i32>,
    /// Numeric scale.
    pub numeric_scale: Option<i32>,
    /// Ordinal position.
    pub ordinal_position: i32,
}

/// Index description after introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSnapshot {
    /// Index name.
    pub name: String,
    /// Indexed columns, in index order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub is_unique: bool,
    /// Whether it backs the primary key.
    pub is_primary: bool,
    /// Index method (btree, hash, ...).
    pub method: String,
}

/// Constraint description after introspection.
///
/// Only PRIMARY KEY, UNIQUE, and FOREIGN KEY constraints are captured:
/// system-generated NOT NULL check rows embed table OIDs in their names and
/// would fabricate drift between structurally identical tenants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintSnapshot {
    /// Constraint name.
    pub name: String,
    /// PRIMARY KEY, UNIQUE, or FOREIGN KEY.
    pub constraint_type: String,
    /// Constrained columns.
    pub columns: Vec<String>,
    /// Referenced table, for foreign keys.
    pub referenced_table: Option<String>,
}

/// One table's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnSnapshot>,
    /// Indexes.
    pub indexes: Vec<IndexSnapshot>,
    /// Constraints.
    pub constraints: Vec<ConstraintSnapshot>,
}

impl TableSnapshot {
    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One namespace's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    /// The introspected schema.
    pub schema: String,
    /// Tables, sorted by name.
    pub tables: Vec<TableSnapshot>,
}

impl SchemaSnapshot {
    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// What to capture during introspection.
#[derive(Debug, Clone)]
pub struct IntrospectOptions {
    /// Capture indexes.
    pub include_indexes: bool,
    /// Capture constraints.
    pub include_constraints: bool,
    /// Table names to skip (the tracking table, typically).
    pub exclude_tables: Vec<String>,
}

impl Default for IntrospectOptions {
    fn default() -> Self {
        Self {
            include_indexes: true,
            include_constraints: true,
            exclude_tables: Vec::new(),
        }
    }
}

/// SQL queries for PostgreSQL introspection.
///
/// Catalog columns come back as `name`/`sql_identifier` domains, so
/// everything is cast to concrete types the driver maps directly.
pub mod queries {
    /// Base tables in a schema.
    pub const TABLES: &str = "\
        SELECT table_name::text \
        FROM information_schema.tables \
        WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
        ORDER BY table_name";

    /// Columns of one table.
    pub const COLUMNS: &str = "\
        SELECT \
            column_name::text, \
            data_type::text, \
            udt_name::text, \
            is_nullable = 'YES' AS is_nullable, \
            column_default::text, \
            character_maximum_length::int4, \
            numeric_precision::int4, \
            numeric_scale::int4, \
            ordinal_position::int4 \
        FROM information_schema.columns \
        WHERE table_schema = $1 AND table_name = $2 \
        ORDER BY ordinal_position";

    /// Indexes of one table.
    pub const INDEXES: &str = "\
        SELECT \
            i.relname::text AS index_name, \
            array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS columns, \
            ix.indisunique AS is_unique, \
            ix.indisprimary AS is_primary, \
            am.amname::text AS index_method \
        FROM pg_index ix \
        JOIN pg_class i ON ix.indexrelid = i.oid \
        JOIN pg_class t ON ix.indrelid = t.oid \
        JOIN pg_namespace n ON t.relnamespace = n.oid \
        JOIN pg_am am ON i.relam = am.oid \
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
        WHERE n.nspname = $1 AND t.relname = $2 \
        GROUP BY i.relname, ix.indisunique, ix.indisprimary, am.amname \
        ORDER BY i.relname";

    /// Key constraints of one table.
    pub const CONSTRAINTS: &str = "\
        SELECT \
            tc.constraint_name::text, \
            tc.constraint_type::text, \
            coalesce( \
                array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position) \
                    FILTER (WHERE kcu.column_name IS NOT NULL), \
                '{}') AS columns, \
            max(ccu.table_name::text) AS referenced_table \
        FROM information_schema.table_constraints tc \
        LEFT JOIN information_schema.key_column_usage kcu \
            ON tc.constraint_name = kcu.constraint_name \
            AND tc.table_schema = kcu.table_schema \
        LEFT JOIN information_schema.constraint_column_usage ccu \
            ON tc.constraint_name = ccu.constraint_name \
            AND tc.table_schema = ccu.table_schema \
            AND tc.constraint_type = 'FOREIGN KEY' \
        WHERE tc.table_schema = $1 AND tc.table_name = $2 \
          AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY') \
        GROUP BY tc.constraint_name, tc.constraint_type \
        ORDER BY tc.constraint_name";
}

/// Introspect one schema into a snapshot.
pub async fn introspect_schema(
    conn: &PgConnection,
    schema: &SchemaName,
    options: &IntrospectOptions,
) -> MigrateResult<SchemaSnapshot> {
    let schema_str = schema.as_str();
    let table_rows = conn
        .query(queries::TABLES, &[&schema_str])
        .await
        .map_err(MigrationError::Pg)?;

    let mut tables = Vec::new();
    for table_row in table_rows {
        let table_name: String = table_row.get(0);
        if options.exclude_tables.iter().any(|t| t == &table_name) {
            continue;
        }

        let columns = conn
            .query(queries::COLUMNS, &[&schema_str, &table_name])
            .await
            .map_err(MigrationError::Pg)?
            .into_iter()
            .map(|row| ColumnSnapshot {
                name: row.get(0),
                data_type: row.get(1),
                udt_name: row.get(2),
                is_nullable: row.get(3),
                column_default: row.get(4),
                character_maximum_length: row.get(5),
                numeric_precision: row.get(6),
                numeric_scale: row.get(7),
                ordinal_position: row.get(8),
            })
            .collect();

        let indexes = if options.include_indexes {
            conn.query(queries::INDEXES, &[&schema_str, &table_name])
                .await
                .map_err(MigrationError::Pg)?
                .into_iter()
                .map(|row| IndexSnapshot {
                    name: row.get(0),
                    columns: row.get(1),
                    is_unique: row.get(2),
                    is_primary: row.get(3),
                    method: row.get(4),
                })
                .collect()
        } else {
            Vec::new()
        };

        let constraints = if options.include_constraints {
            conn.query(queries::CONSTRAINTS, &[&schema_str, &table_name])
                .await
                .map_err(MigrationError::Pg)?
                .into_iter()
                .map(|row| ConstraintSnapshot {
                    name: row.get(0),
                    constraint_type: row.get(1),
                    columns: row.get(2),
                    referenced_table: row.get(3),
                })
                .collect()
        } else {
            Vec::new()
        };

        tables.push(TableSnapshot {
            name: table_name,
            columns,
            indexes,
            constraints,
        });
    }

    debug!(schema = %schema, tables = tables.len(), "schema introspected");
    Ok(SchemaSnapshot {
        schema: schema_str.to_string(),
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = SchemaSnapshot {
            schema: "tenant_a".to_string(),
            tables: vec![TableSnapshot {
                name: "users".to_string(),
                columns: vec![ColumnSnapshot {
                    name: "id".to_string(),
                    data_type: "uuid".to_string(),
                    udt_name: "uuid".to_string(),
                    is_nullable: false,
                    column_default: None,
                    character_maximum_length: None,
                    numeric_precision: None,
                    numeric_scale: None,
                    ordinal_position: 1,
                }],
                indexes: Vec::new(),
                constraints: Vec::new(),
            }],
        };

        assert!(snapshot.table("users").is_some());
        assert!(snapshot.table("orders").is_none());
        assert!(snapshot.table("users").unwrap().column("id").is_some());
        assert!(snapshot.table("users").unwrap().column("email").is_none());
    }

    #[test]
    fn test_queries_scope_by_schema() {
        for sql in [
            queries::TABLES,
            queries::COLUMNS,
            queries::INDEXES,
            queries::CONSTRAINTS,
        ] {
            assert!(sql.contains("$1"));
        }
        assert!(queries::CONSTRAINTS.contains("PRIMARY KEY"));
        assert!(!queries::CONSTRAINTS.contains("CHECK"));
    }
}
