//! Migrations tracking table: formats, detection, and row access.
//!
//! Each tenant schema (and the shared schema) carries exactly one tracking
//! table in one of three recognized formats. The format of an existing
//! table is never altered; detection reads the column shape and refuses
//! anything it does not recognize.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_core::SchemaName;
use tessera_postgres::{PgConnection, PgTransaction};
use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::file::MigrationFile;

/// Recognized tracking table formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableFormat {
    /// `id, name, applied_at|created_at` - identified by file name.
    Name,
    /// `id, hash, created_at` (timestamptz) - identified by content hash.
    Hash,
    /// `id, hash, created_at` (bigint ms) - drizzle-kit's own layout.
    DrizzleKit,
}

impl TableFormat {
    /// The format tag as configuration spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Hash => "hash",
            Self::DrizzleKit => "drizzle-kit",
        }
    }

    /// The identifier this format records for a migration file.
    pub fn identifier_of<'a>(&self, file: &'a MigrationFile) -> &'a str {
        match self {
            Self::Name => &file.name,
            Self::Hash | Self::DrizzleKit => &file.hash,
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "hash" => Ok(Self::Hash),
            "drizzle-kit" => Ok(Self::DrizzleKit),
            other => Err(format!("unknown table format '{}'", other)),
        }
    }
}

/// Format selection for tables that do not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatChoice {
    /// Detect an existing table; create new tables in the default format.
    #[default]
    Auto,
    /// Always use this format for new tables (existing tables still win).
    Fixed(TableFormat),
}

impl FromStr for FormatChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "auto" {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Fixed)
        }
    }
}

/// A detected (or freshly created) format, with the timestamp column the
/// table actually uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    /// The format tag.
    pub format: TableFormat,
    /// `applied_at` or `created_at`.
    pub timestamp_column: String,
}

/// One applied-migration row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    /// File name or content hash, depending on the format.
    pub identifier: String,
    /// When the migration was recorded.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Handle to one schema's tracking table with a resolved format.
#[derive(Debug, Clone)]
pub struct TrackingTable {
    schema: SchemaName,
    table: String,
    info: FormatInfo,
}

impl TrackingTable {
    /// Detect the format of an existing tracking table.
    ///
    /// Returns `Ok(None)` when the table does not exist. A table whose
    /// column shape matches no recognized format (including one carrying
    /// both `name` and `hash` columns) is an error.
    pub async fn detect(
        conn: &PgConnection,
        schema: &SchemaName,
        table: &str,
    ) -> MigrateResult<Option<FormatInfo>> {
        let rows = conn
            .query(
                "SELECT column_name::text, data_type::text \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&schema.as_str(), &table],
            )
            .await
            .map_err(MigrationError::Pg)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut has_name = false;
        let mut has_hash = false;
        let mut timestamp_column = None;
        let mut created_at_type = None;
        for row in &rows {
            let column: String = row.get(0);
            let data_type: String = row.get(1);
            match column.as_str() {
                "name" => has_name = true,
                "hash" => has_hash = true,
                "applied_at" => timestamp_column = Some("applied_at".to_string()),
                "created_at" => {
                    if timestamp_column.is_none() {
                        timestamp_column = Some("created_at".to_string());
                    }
                    created_at_type = Some(data_type);
                }
                _ => {}
            }
        }

        if has_name && has_hash {
            return Err(MigrationError::format_unknown(
                schema.as_str(),
                "table carries both 'name' and 'hash' columns",
            ));
        }

        let Some(timestamp_column) = timestamp_column else {
            return Err(MigrationError::format_unknown(
                schema.as_str(),
                "table has no 'applied_at' or 'created_at' column",
            ));
        };

        if has_name {
            return Ok(Some(FormatInfo {
                format: TableFormat::Name,
                timestamp_column,
            }));
        }

        if has_hash {
            let format = match created_at_type.as_deref() {
                Some("bigint") => TableFormat::DrizzleKit,
                _ => TableFormat::Hash,
            };
            return Ok(Some(FormatInfo {
                format,
                timestamp_column,
            }));
        }

        Err(MigrationError::format_unknown(
            schema.as_str(),
            "table has neither a 'name' nor a 'hash' column",
        ))
    }

    /// Detect the table's format, creating the table if it is absent.
    ///
    /// An existing table always wins over the configured format; a fresh
    /// table is created in the fixed format, or in `default_format` under
    /// `Auto`.
    pub async fn open(
        conn: &PgConnection,
        schema: &SchemaName,
        table: &str,
        choice: FormatChoice,
        default_format: TableFormat,
    ) -> MigrateResult<Self> {
        if let Some(info) = Self::detect(conn, schema, table).await? {
            debug!(schema = %schema, table, format = %info.format, "tracking table detected");
            return Ok(Self {
                schema: schema.clone(),
                table: table.to_string(),
                info,
            });
        }

        let format = match choice {
            FormatChoice::Fixed(format) => format,
            FormatChoice::Auto => default_format,
        };
        let tracking = Self {
            schema: schema.clone(),
            table: table.to_string(),
            info: FormatInfo {
                format,
                timestamp_column: match format {
                    TableFormat::Name => "applied_at".to_string(),
                    TableFormat::Hash | TableFormat::DrizzleKit => "created_at".to_string(),
                },
            },
        };
        conn.batch_execute(&tracking.create_sql())
            .await
            .map_err(MigrationError::Pg)?;
        info!(schema = %schema, table, format = %format, "tracking table created");
        Ok(tracking)
    }

    /// The resolved format.
    pub fn format(&self) -> TableFormat {
        self.info.format
    }

    /// The schema-qualified, quoted table name.
    pub fn qualified(&self) -> String {
        format!("{}.\"{}\"", self.schema.quoted(), self.table)
    }

    /// The bare table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this format.
    fn create_sql(&self) -> String {
        let qualified = self.qualified();
        match self.info.format {
            TableFormat::Name => format!(
                "CREATE TABLE IF NOT EXISTS {qualified} (\
                 id SERIAL PRIMARY KEY, \
                 name text NOT NULL, \
                 applied_at timestamptz NOT NULL DEFAULT now())"
            ),
            TableFormat::Hash => format!(
                "CREATE TABLE IF NOT EXISTS {qualified} (\
                 id SERIAL PRIMARY KEY, \
                 hash text NOT NULL, \
                 created_at timestamptz NOT NULL DEFAULT now())"
            ),
            TableFormat::DrizzleKit => format!(
                "CREATE TABLE IF NOT EXISTS {qualified} (\
                 id SERIAL PRIMARY KEY, \
                 hash text NOT NULL, \
                 created_at bigint)"
            ),
        }
    }

    fn identifier_column(&self) -> &'static str {
        match self.info.format {
            TableFormat::Name => "name",
            TableFormat::Hash | TableFormat::DrizzleKit => "hash",
        }
    }

    /// Read all applied rows in insertion order.
    pub async fn applied(&self, conn: &PgConnection) -> MigrateResult<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT {}, {} FROM {} ORDER BY id",
            self.identifier_column(),
            self.info.timestamp_column,
            self.qualified()
        );
        let rows = conn.query(&sql, &[]).await.map_err(MigrationError::Pg)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let identifier: String = row.get(0);
            let applied_at = match self.info.format {
                TableFormat::DrizzleKit => {
                    let ms: Option<i64> = row.get(1);
                    ms.and_then(DateTime::from_timestamp_millis)
                }
                _ => row.get::<_, Option<DateTime<Utc>>>(1),
            };
            records.push(AppliedMigration {
                identifier,
                applied_at,
            });
        }
        Ok(records)
    }

    /// Record a migration inside the caller's transaction.
    ///
    /// Writes the identifier the current format mandates; it never writes
    /// the "other" identifier even when the applied set tolerated it.
    pub async fn insert_in_tx(
        &self,
        tx: &PgTransaction<'_>,
        file: &MigrationFile,
    ) -> MigrateResult<()> {
        let identifier = self.info.format.identifier_of(file);
        match self.info.format {
            TableFormat::DrizzleKit => {
                let sql = format!(
                    "INSERT INTO {} (hash, created_at) VALUES ($1, $2)",
                    self.qualified()
                );
                let now_ms = Utc::now().timestamp_millis();
                tx.execute(&sql, &[&identifier, &now_ms])
                    .await
                    .map_err(MigrationError::Pg)?;
            }
            _ => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES ($1, now())",
                    self.qualified(),
                    self.identifier_column(),
                    self.info.timestamp_column
                );
                tx.execute(&sql, &[&identifier])
                    .await
                    .map_err(MigrationError::Pg)?;
            }
        }
        Ok(())
    }

    /// Delete rows by identifier inside the caller's transaction.
    pub async fn delete_in_tx(
        &self,
        tx: &PgTransaction<'_>,
        identifiers: &[String],
    ) -> MigrateResult<u64> {
        if identifiers.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ANY($1)",
            self.qualified(),
            self.identifier_column()
        );
        let ids: Vec<&str> = identifiers.iter().map(String::as_str).collect();
        let deleted = tx.execute(&sql, &[&ids]).await.map_err(MigrationError::Pg)?;
        Ok(deleted)
    }
}

/// Collect the identifier set out of applied rows.
pub fn applied_identifiers(records: &[AppliedMigration]) -> HashSet<String> {
    records.iter().map(|r| r.identifier.clone()).collect()
}

/// The ordered subsequence of `files` not yet in the applied set.
///
/// Under the hash formats a file counts as applied when either its hash or
/// its name is present, tolerating rows written under a prior format.
pub fn pending_files<'a>(
    format: TableFormat,
    files: &'a [MigrationFile],
    applied: &HashSet<String>,
) -> Vec<&'a MigrationFile> {
    files
        .iter()
        .filter(|file| !is_applied(format, file, applied))
        .collect()
}

/// Whether one file is covered by the applied set.
pub fn is_applied(format: TableFormat, file: &MigrationFile, applied: &HashSet<String>) -> bool {
    match format {
        TableFormat::Name => applied.contains(&file.name),
        TableFormat::Hash | TableFormat::DrizzleKit => {
            applied.contains(&file.hash) || applied.contains(&file.name)
        }
    }
}

/// Identifiers recorded in the tracking table with no matching file.
pub fn orphan_identifiers(
    format: TableFormat,
    files: &[MigrationFile],
    records: &[AppliedMigration],
) -> Vec<String> {
    let disk: HashSet<&str> = match format {
        TableFormat::Name => files.iter().map(|f| f.name.as_str()).collect(),
        TableFormat::Hash | TableFormat::DrizzleKit => files
            .iter()
            .flat_map(|f| [f.hash.as_str(), f.name.as_str()])
            .collect(),
    };
    records
        .iter()
        .filter(|r| !disk.contains(r.identifier.as_str()))
        .map(|r| r.identifier.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, sql: &str) -> MigrationFile {
        MigrationFile::from_content(name, format!("/m/{name}.sql"), sql).unwrap()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("name".parse::<TableFormat>().unwrap(), TableFormat::Name);
        assert_eq!(
            "drizzle-kit".parse::<TableFormat>().unwrap(),
            TableFormat::DrizzleKit
        );
        assert!("yaml".parse::<TableFormat>().is_err());

        assert_eq!("auto".parse::<FormatChoice>().unwrap(), FormatChoice::Auto);
        assert_eq!(
            "hash".parse::<FormatChoice>().unwrap(),
            FormatChoice::Fixed(TableFormat::Hash)
        );
    }

    #[test]
    fn test_identifier_of() {
        let f = file("0001_init", "SELECT 1;");
        assert_eq!(TableFormat::Name.identifier_of(&f), "0001_init");
        assert_eq!(TableFormat::Hash.identifier_of(&f), f.hash.as_str());
    }

    #[test]
    fn test_pending_under_name_format() {
        let files = vec![file("0001_init", "a"), file("0002_users", "b")];
        let applied: HashSet<String> = ["0001_init".to_string()].into();

        let pending = pending_files(TableFormat::Name, &files, &applied);
        let names: Vec<_> = pending.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["0002_users"]);
    }

    #[test]
    fn test_pending_hash_format_accepts_either_identifier() {
        let files = vec![file("0001_init", "a"), file("0002_users", "b")];
        // One row recorded by hash, one by name (prior format).
        let applied: HashSet<String> =
            [files[0].hash.clone(), "0002_users".to_string()].into();

        let pending = pending_files(TableFormat::Hash, &files, &applied);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_orphans_by_format() {
        let files = vec![file("0001_init", "a")];
        let records = vec![
            AppliedMigration {
                identifier: "0001_init".to_string(),
                applied_at: None,
            },
            AppliedMigration {
                identifier: "0099_ghost".to_string(),
                applied_at: None,
            },
        ];

        let orphans = orphan_identifiers(TableFormat::Name, &files, &records);
        assert_eq!(orphans, ["0099_ghost"]);

        // Hash format: the name row is tolerated, the ghost is not.
        let orphans = orphan_identifiers(TableFormat::Hash, &files, &records);
        assert_eq!(orphans, ["0099_ghost"]);
    }

    #[test]
    fn test_create_sql_shapes() {
        let schema = SchemaName::new("tenant_a").unwrap();
        let make = |format, timestamp_column: &str| TrackingTable {
            schema: schema.clone(),
            table: "__drizzle_migrations".to_string(),
            info: FormatInfo {
                format,
                timestamp_column: timestamp_column.to_string(),
            },
        };

        let sql = make(TableFormat::Name, "applied_at").create_sql();
        assert!(sql.contains("\"tenant_a\".\"__drizzle_migrations\""));
        assert!(sql.contains("name text NOT NULL"));
        assert!(sql.contains("applied_at timestamptz"));

        let sql = make(TableFormat::Hash, "created_at").create_sql();
        assert!(sql.contains("hash text NOT NULL"));
        assert!(sql.contains("created_at timestamptz"));

        let sql = make(TableFormat::DrizzleKit, "created_at").create_sql();
        assert!(sql.contains("created_at bigint"));
    }

    #[test]
    fn test_sync_reconstruction_invariant() {
        // missing ∪ applied == disk set, orphans == applied \ disk.
        let files = vec![file("0001_a", "a"), file("0002_b", "b"), file("0003_c", "c")];
        let records = vec![
            AppliedMigration {
                identifier: "0001_a".to_string(),
                applied_at: None,
            },
            AppliedMigration {
                identifier: "0099_x".to_string(),
                applied_at: None,
            },
        ];
        let applied = applied_identifiers(&records);

        let missing: HashSet<String> = pending_files(TableFormat::Name, &files, &applied)
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let orphans: HashSet<String> =
            orphan_identifiers(TableFormat::Name, &files, &records)
                .into_iter()
                .collect();

        let disk: HashSet<String> = files.iter().map(|f| f.name.clone()).collect();
        let applied_on_disk: HashSet<String> =
            applied.intersection(&disk).cloned().collect();

        let mut reunion = missing.clone();
        reunion.extend(applied_on_disk);
        assert_eq!(reunion, disk);
        assert_eq!(
            orphans,
            applied.difference(&disk).cloned().collect::<HashSet<_>>()
        );
    }
}
