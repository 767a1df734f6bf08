//! Schema lifecycle: create, drop, list.
//!
//! All DDL runs over the shared pool; identifiers are validated and quoted
//! because they cannot be bound as parameters.

use tessera_core::{SchemaName, TenantId};
use tracing::info;

use crate::error::{PgError, PgResult};
use crate::manager::PoolManager;

/// Options for dropping a tenant schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropSchemaOptions {
    /// Drop contained objects too.
    pub cascade: bool,
    /// Drop even a non-empty schema when `cascade` is off.
    pub force: bool,
}

impl DropSchemaOptions {
    /// Options with both flags off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable cascade.
    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    /// Enable force.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Creates, drops, and inspects tenant schemas.
#[derive(Clone, Debug)]
pub struct SchemaManager {
    manager: PoolManager,
}

impl SchemaManager {
    /// Create a schema manager on top of a pool manager.
    pub fn new(manager: PoolManager) -> Self {
        Self { manager }
    }

    /// Create the tenant's schema if it does not exist. Idempotent.
    pub async fn create_schema(&self, tenant_id: &TenantId) -> PgResult<SchemaName> {
        let schema = self.manager.schema_name(tenant_id)?;
        let shared = self.manager.get_shared_db().await?;
        let conn = shared.get().await?;
        conn.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
            .await?;
        info!(tenant_id = %tenant_id, schema = %schema, "schema created");
        Ok(schema)
    }

    /// Check whether the tenant's schema exists.
    pub async fn schema_exists(&self, tenant_id: &TenantId) -> PgResult<bool> {
        let schema = self.manager.schema_name(tenant_id)?;
        let shared = self.manager.get_shared_db().await?;
        let conn = shared.get().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
                &[&schema.as_str()],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Drop the tenant's schema.
    ///
    /// The tenant's cached pool is evicted first so no connection keeps the
    /// dropped schema on its `search_path`. A non-empty schema is refused
    /// unless `cascade` or `force` is set.
    pub async fn drop_schema(
        &self,
        tenant_id: &TenantId,
        options: DropSchemaOptions,
    ) -> PgResult<()> {
        let schema = self.manager.schema_name(tenant_id)?;
        if !self.schema_exists(tenant_id).await? {
            return Err(PgError::schema_missing(tenant_id.as_str()));
        }

        self.manager.evict_pool(tenant_id).await?;

        let shared = self.manager.get_shared_db().await?;
        let conn = shared.get().await?;

        if !options.cascade && !options.force {
            let row = conn
                .query_one(
                    "SELECT count(*) FROM information_schema.tables WHERE table_schema = $1",
                    &[&schema.as_str()],
                )
                .await?;
            let tables: i64 = row.get(0);
            if tables > 0 {
                return Err(PgError::SchemaNotEmpty {
                    schema: schema.as_str().to_string(),
                });
            }
        }

        let cascade = options.cascade || options.force;
        let sql = format!(
            "DROP SCHEMA {}{}",
            schema.quoted(),
            if cascade { " CASCADE" } else { "" }
        );
        conn.batch_execute(&sql).await?;
        info!(tenant_id = %tenant_id, schema = %schema, cascade, "schema dropped");
        Ok(())
    }

    /// List non-system schemas in the database.
    pub async fn list_schemas(&self) -> PgResult<Vec<String>> {
        let shared = self.manager.get_shared_db().await?;
        let conn = shared.get().await?;
        let rows = conn
            .query(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT LIKE 'pg_%' \
                   AND schema_name <> 'information_schema' \
                 ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_options_builder() {
        let options = DropSchemaOptions::new().cascade(true);
        assert!(options.cascade);
        assert!(!options.force);
        assert!(!DropSchemaOptions::default().cascade);
    }
}
