//! Schema-bound connections.
//!
//! A connection handed out by a tenant pool knows which schema and tenant
//! it serves: statements are traced under that identity, prepared keys are
//! tracked per pool, and an optional caller-supplied deadline bounds every
//! call on the handle (migrations deliberately carry none; health probes
//! and request paths set one).

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::Object;
use tessera_core::{SchemaName, TenantId};
use tokio_postgres::Row;
use tracing::debug;

use crate::error::{PgError, PgResult};
use crate::statement::StatementCache;

async fn bounded<T>(
    deadline: Option<Duration>,
    work: impl Future<Output = PgResult<T>>,
) -> PgResult<T> {
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(PgError::Timeout(deadline.as_millis() as u64)),
        },
        None => work.await,
    }
}

/// A pooled connection pinned to one tenant's schema.
///
/// The `search_path` was set when the underlying connection was opened, so
/// unqualified names resolve inside the tenant's namespace.
pub struct PgConnection {
    client: Object,
    schema: SchemaName,
    tenant_id: Option<TenantId>,
    statements: Arc<StatementCache>,
    deadline: Option<Duration>,
}

impl PgConnection {
    pub(crate) fn new(
        client: Object,
        schema: SchemaName,
        tenant_id: Option<TenantId>,
        statements: Arc<StatementCache>,
    ) -> Self {
        Self {
            client,
            schema,
            tenant_id,
            statements,
            deadline: None,
        }
    }

    /// Bound every call on this handle by `deadline`.
    ///
    /// A call that exceeds it fails with [`PgError::Timeout`]; the server
    /// may still finish the statement.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The deadline applied to calls on this handle, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// The schema this connection is pinned to.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// The tenant this connection serves; `None` for the shared schema.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Execute a query and return all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<Vec<Row>> {
        debug!(schema = %self.schema, sql = %sql, "executing query");
        bounded(self.deadline, async {
            let stmt = self.statements.prepare(&self.client, sql).await?;
            Ok(self.client.query(&stmt, params).await?)
        })
        .await
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<Row> {
        bounded(self.deadline, async {
            let stmt = self.statements.prepare(&self.client, sql).await?;
            Ok(self.client.query_one(&stmt, params).await?)
        })
        .await
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<Option<Row>> {
        bounded(self.deadline, async {
            let stmt = self.statements.prepare(&self.client, sql).await?;
            Ok(self.client.query_opt(&stmt, params).await?)
        })
        .await
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<u64> {
        debug!(schema = %self.schema, sql = %sql, "executing statement");
        bounded(self.deadline, async {
            let stmt = self.statements.prepare(&self.client, sql).await?;
            Ok(self.client.execute(&stmt, params).await?)
        })
        .await
    }

    /// Execute a batch of statements in a single round-trip.
    ///
    /// Uses the simple query protocol, so the batch may contain several
    /// statements - migration files and schema DDL usually do. Batches
    /// are never prepared, so they stay out of the statement cache.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(schema = %self.schema, "executing batch");
        bounded(self.deadline, async {
            Ok(self.client.batch_execute(sql).await?)
        })
        .await
    }

    /// Begin a transaction. The handle's schema identity and deadline
    /// carry over to the transaction.
    pub async fn transaction(&mut self) -> PgResult<PgTransaction<'_>> {
        debug!(schema = %self.schema, "beginning transaction");
        let deadline = self.deadline;
        let schema = self.schema.clone();
        let statements = self.statements.clone();
        let txn = bounded(deadline, async { Ok(self.client.transaction().await?) }).await?;
        Ok(PgTransaction {
            txn,
            schema,
            statements,
            deadline,
        })
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("schema", &self.schema)
            .field("tenant_id", &self.tenant_id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A transaction on a schema-bound connection.
pub struct PgTransaction<'a> {
    txn: deadpool_postgres::Transaction<'a>,
    schema: SchemaName,
    statements: Arc<StatementCache>,
    deadline: Option<Duration>,
}

impl PgTransaction<'_> {
    /// The schema this transaction runs in.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// Execute a query and return all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<Vec<Row>> {
        bounded(self.deadline, async {
            let stmt = self.statements.prepare_in_txn(&self.txn, sql).await?;
            Ok(self.txn.query(&stmt, params).await?)
        })
        .await
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<Row> {
        bounded(self.deadline, async {
            let stmt = self.statements.prepare_in_txn(&self.txn, sql).await?;
            Ok(self.txn.query_one(&stmt, params).await?)
        })
        .await
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> PgResult<u64> {
        bounded(self.deadline, async {
            let stmt = self.statements.prepare_in_txn(&self.txn, sql).await?;
            Ok(self.txn.execute(&stmt, params).await?)
        })
        .await
    }

    /// Execute a batch of statements inside the transaction.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        bounded(self.deadline, async {
            Ok(self.txn.batch_execute(sql).await?)
        })
        .await
    }

    /// Commit the transaction.
    pub async fn commit(self) -> PgResult<()> {
        debug!(schema = %self.schema, "committing transaction");
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.txn.commit()).await {
                Ok(result) => result?,
                Err(_) => return Err(PgError::Timeout(deadline.as_millis() as u64)),
            },
            None => self.txn.commit().await?,
        }
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(self) -> PgResult<()> {
        debug!(schema = %self.schema, "rolling back transaction");
        self.txn.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Driving a connection needs a live PostgreSQL server; the deadline
    // and identity plumbing is exercised through TenantDb (pool.rs) and
    // the statement bookkeeping in statement.rs.
}
