//! Migration file loading.
//!
//! Migrations are flat `*.sql` files whose names begin with a digit
//! sequence; lexicographic file-name order is chronological order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};

/// A migration file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFile {
    /// Migration name (file name without the `.sql` extension).
    pub name: String,
    /// Path to the file.
    pub path: PathBuf,
    /// Normalized SQL content.
    pub sql: String,
    /// Leading integer prefix of the file name.
    pub timestamp: i64,
    /// SHA-256 of the normalized content, hex encoded.
    pub hash: String,
}

impl MigrationFile {
    /// Build a migration from a name and its raw content.
    pub fn from_content(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content: &str,
    ) -> MigrateResult<Self> {
        let name = name.into();
        let timestamp = parse_timestamp(&name)?;
        let sql = normalize_sql(content);
        let hash = compute_hash(&sql);
        Ok(Self {
            name,
            path: path.into(),
            sql,
            timestamp,
            hash,
        })
    }
}

/// Normalize migration content before hashing and execution.
///
/// Strips a UTF-8 BOM, converts CRLF to LF, and drops trailing whitespace,
/// so editor artifacts do not change a migration's identity.
pub fn normalize_sql(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let content = content.replace("\r\n", "\n");
    content.trim_end().to_string()
}

/// SHA-256 over the normalized content.
pub fn compute_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the leading integer prefix of a migration name.
fn parse_timestamp(name: &str) -> MigrateResult<i64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(MigrationError::InvalidMigrationName(name.to_string()));
    }
    digits
        .parse()
        .map_err(|_| MigrationError::InvalidMigrationName(name.to_string()))
}

/// Reads migration files from one folder.
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    folder: PathBuf,
    optional: bool,
}

impl MigrationLoader {
    /// Create a loader for a required folder.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            optional: false,
        }
    }

    /// Mark the folder as optional: a missing folder loads zero migrations
    /// instead of failing.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// The folder this loader reads.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Load all migrations, sorted by file name.
    pub async fn load(&self) -> MigrateResult<Vec<MigrationFile>> {
        if !self.folder.exists() {
            if self.optional {
                debug!(folder = %self.folder.display(), "optional migrations folder absent");
                return Ok(Vec::new());
            }
            return Err(MigrationError::MissingFolder(self.folder.clone()));
        }

        let mut entries = tokio::fs::read_dir(&self.folder).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && has_sql_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut migrations = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    MigrationError::InvalidMigrationName(path.display().to_string())
                })?
                .to_string();

            if !seen.insert(name.clone()) {
                return Err(MigrationError::DuplicateMigration(name));
            }

            let content = tokio::fs::read_to_string(&path).await?;
            migrations.push(MigrationFile::from_content(name, path, &content)?);
        }

        debug!(
            folder = %self.folder.display(),
            count = migrations.len(),
            "loaded migrations"
        );
        Ok(migrations)
    }
}

fn has_sql_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("sql"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(dir: &Path, name: &str, content: &str) {
        tokio::fs::write(dir.join(name), content).await.unwrap();
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("0001_init").unwrap(), 1);
        assert_eq!(
            parse_timestamp("20231215120000_create_users").unwrap(),
            20231215120000
        );
        assert!(parse_timestamp("init").is_err());
        assert!(parse_timestamp("_0001").is_err());
        // Too many digits for an i64.
        assert!(parse_timestamp(&"9".repeat(20)).is_err());
    }

    #[test]
    fn test_normalize_strips_bom_and_crlf() {
        let raw = "\u{feff}CREATE TABLE t();\r\nSELECT 1;\r\n";
        assert_eq!(normalize_sql(raw), "CREATE TABLE t();\nSELECT 1;");
    }

    #[test]
    fn test_hash_ignores_trailing_whitespace() {
        let a = compute_hash(&normalize_sql("SELECT 1;"));
        let b = compute_hash(&normalize_sql("SELECT 1;   \n\n"));
        let c = compute_hash(&normalize_sql("SELECT 2;"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_ignores_line_endings() {
        let unix = compute_hash(&normalize_sql("SELECT 1;\nSELECT 2;"));
        let dos = compute_hash(&normalize_sql("SELECT 1;\r\nSELECT 2;"));
        assert_eq!(unix, dos);
    }

    #[tokio::test]
    async fn test_load_sorted_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "0002_add_users.sql", "CREATE TABLE users();").await;
        write_file(dir.path(), "0001_init.sql", "CREATE TABLE init();").await;
        write_file(dir.path(), "0010_late.sql", "SELECT 1;").await;
        write_file(dir.path(), "README.md", "not a migration").await;

        let migrations = MigrationLoader::new(dir.path()).load().await.unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["0001_init", "0002_add_users", "0010_late"]);
        assert_eq!(migrations[0].timestamp, 1);
    }

    #[tokio::test]
    async fn test_load_accepts_uppercase_extension() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "0001_init.SQL", "SELECT 1;").await;

        let migrations = MigrationLoader::new(dir.path()).load().await.unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "0001_init");
    }

    #[tokio::test]
    async fn test_load_rejects_missing_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "init.sql", "SELECT 1;").await;

        let err = MigrationLoader::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigrationName(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "0001_init.sql", "SELECT 1;").await;
        write_file(dir.path(), "0001_init.SQL", "SELECT 2;").await;

        let err = MigrationLoader::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration(_)));
    }

    #[tokio::test]
    async fn test_missing_folder_hard_and_soft() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");

        let err = MigrationLoader::new(&gone).load().await.unwrap_err();
        assert!(matches!(err, MigrationError::MissingFolder(_)));

        let migrations = MigrationLoader::new(&gone)
            .optional(true)
            .load()
            .await
            .unwrap();
        assert!(migrations.is_empty());
    }

    #[tokio::test]
    async fn test_identical_content_same_hash_allowed() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "0001_a.sql", "SELECT 1;").await;
        write_file(dir.path(), "0002_b.sql", "SELECT 1;").await;

        let migrations = MigrationLoader::new(dir.path()).load().await.unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].hash, migrations[1].hash);
    }
}
