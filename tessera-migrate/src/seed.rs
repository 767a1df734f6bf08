//! Tenant and shared-schema seeding.
//!
//! A seed is user code run against a tenant's database handle. The seeder
//! never wraps it in a transaction; a seed that needs one opens its own.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tessera_core::TenantId;
use tessera_postgres::{PoolManager, TenantDb};
use tracing::{info, warn};

use crate::batch::{BatchSummary, ErrorPolicy, SKIPPED_BY_ABORT, TaskOutcome, run_batched};
use crate::error::{MigrateResult, MigrationError};

/// Errors a seed may return.
pub type SeedError = Box<dyn std::error::Error + Send + Sync>;

/// User code run once per tenant.
#[async_trait]
pub trait TenantSeed: Send + Sync {
    /// Seed one tenant's schema through its pool handle.
    async fn seed(&self, db: &TenantDb, tenant_id: &TenantId) -> Result<(), SeedError>;
}

/// User code run once against the shared schema.
#[async_trait]
pub trait SharedSeed: Send + Sync {
    /// Seed the shared schema through its pool handle.
    async fn seed(&self, db: &TenantDb) -> Result<(), SeedError>;
}

/// Adapt a closure into a [`TenantSeed`].
pub fn seed_fn<F, Fut>(f: F) -> impl TenantSeed
where
    F: Fn(TenantDb, TenantId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SeedError>> + Send,
{
    struct FnSeed<F>(F);

    #[async_trait]
    impl<F, Fut> TenantSeed for FnSeed<F>
    where
        F: Fn(TenantDb, TenantId) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), SeedError>> + Send,
    {
        async fn seed(&self, db: &TenantDb, tenant_id: &TenantId) -> Result<(), SeedError> {
            (self.0)(db.clone(), tenant_id.clone()).await
        }
    }

    FnSeed(f)
}

/// Adapt a closure into a [`SharedSeed`].
pub fn shared_seed_fn<F, Fut>(f: F) -> impl SharedSeed
where
    F: Fn(TenantDb) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SeedError>> + Send,
{
    struct FnSeed<F>(F);

    #[async_trait]
    impl<F, Fut> SharedSeed for FnSeed<F>
    where
        F: Fn(TenantDb) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), SeedError>> + Send,
    {
        async fn seed(&self, db: &TenantDb) -> Result<(), SeedError> {
            (self.0)(db.clone()).await
        }
    }

    FnSeed(f)
}

/// Result of seeding one tenant (or the shared schema, with no tenant).
#[derive(Debug, Clone, Serialize)]
pub struct SeedResult {
    /// The seeded tenant; `None` for the shared schema.
    pub tenant_id: Option<TenantId>,
    /// Whether the seed returned Ok.
    pub success: bool,
    /// Whether the tenant was never attempted (aborted run).
    pub skipped: bool,
    /// Error text when `success` is false.
    pub error: Option<String>,
    /// Wall-clock time.
    pub duration_ms: u64,
}

/// Aggregate of a fleet-wide seed run.
#[derive(Debug, Clone, Serialize)]
pub struct SeedAllResult {
    /// Tally of the run.
    pub summary: BatchSummary,
    /// Per-tenant details, in input order.
    pub details: Vec<SeedResult>,
}

/// Options for a fleet-wide seed run.
#[derive(Clone, Default)]
pub struct SeedOptions {
    /// Tenants seeded concurrently per batch. Defaults to 10.
    pub concurrency: Option<usize>,
    /// Failure handler deciding continue vs abort. Defaults to continue.
    pub on_error: Option<Arc<dyn Fn(&TenantId, &MigrationError) -> ErrorPolicy + Send + Sync>>,
}

impl SeedOptions {
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

    /// Set the failure handler.
    pub fn on_error(
        mut self,
        f: impl Fn(&TenantId, &MigrationError) -> ErrorPolicy + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for SeedOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedOptions")
            .field("concurrency", &self.concurrency)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Runs seeds against tenants and the shared schema.
#[derive(Clone, Debug)]
pub struct Seeder {
    manager: PoolManager,
}

impl Seeder {
    /// Create a seeder.
    pub fn new(manager: PoolManager) -> Self {
        Self { manager }
    }

    /// Seed one tenant.
    pub async fn seed_tenant(
        &self,
        tenant_id: &TenantId,
        seed: &dyn TenantSeed,
    ) -> MigrateResult<SeedResult> {
        let started = Instant::now();
        let db = self.manager.get_db(tenant_id).await?;

        match seed.seed(&db, tenant_id).await {
            Ok(()) => {
                info!(tenant_id = %tenant_id, "tenant seeded");
                Ok(SeedResult {
                    tenant_id: Some(tenant_id.clone()),
                    success: true,
                    skipped: false,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                let err = MigrationError::SeedFailed {
                    target: tenant_id.as_str().to_string(),
                    message: err.to_string(),
                };
                warn!(tenant_id = %tenant_id, error = %err, "seed failed");
                Ok(SeedResult {
                    tenant_id: Some(tenant_id.clone()),
                    success: false,
                    skipped: false,
                    error: Some(err.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Seed many tenants with bounded concurrency.
    pub async fn seed_tenants(
        &self,
        tenant_ids: Vec<TenantId>,
        seed: &dyn TenantSeed,
        options: &SeedOptions,
    ) -> MigrateResult<SeedAllResult> {
        let concurrency = options
            .concurrency
            .unwrap_or(SeedOptions::DEFAULT_CONCURRENCY);
        let on_error = options.on_error.clone();

        let outcomes = run_batched(
            tenant_ids,
            concurrency,
            move |tenant_id, err| match &on_error {
                Some(handler) => handler(tenant_id, err),
                None => ErrorPolicy::Continue,
            },
            move |tenant_id| async move { self.seed_tenant(&tenant_id, seed).await },
        )
        .await;

        let summary = BatchSummary::tally(&outcomes, |result: &SeedResult| result.success);
        let details = outcomes
            .into_iter()
            .map(|(tenant_id, outcome)| match outcome {
                TaskOutcome::Done(result) => result,
                TaskOutcome::Failed(err) => SeedResult {
                    tenant_id: Some(tenant_id),
                    success: false,
                    skipped: false,
                    error: Some(err.to_string()),
                    duration_ms: 0,
                },
                TaskOutcome::Skipped => SeedResult {
                    tenant_id: Some(tenant_id),
                    success: false,
                    skipped: true,
                    error: Some(SKIPPED_BY_ABORT.to_string()),
                    duration_ms: 0,
                },
            })
            .collect();

        Ok(SeedAllResult { summary, details })
    }

    /// Seed the shared schema once.
    pub async fn seed_shared(&self, seed: &dyn SharedSeed) -> MigrateResult<SeedResult> {
        let started = Instant::now();
        let db = self.manager.get_shared_db().await?;
        let schema = self.manager.shared_schema().clone();

        match seed.seed(&db).await {
            Ok(()) => {
                info!(schema = %schema, "shared schema seeded");
                Ok(SeedResult {
                    tenant_id: None,
                    success: true,
                    skipped: false,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                let err = MigrationError::SeedFailed {
                    target: schema.as_str().to_string(),
                    message: err.to_string(),
                };
                warn!(schema = %schema, error = %err, "shared seed failed");
                Ok(SeedResult {
                    tenant_id: None,
                    success: false,
                    skipped: false,
                    error: Some(err.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_options_builder() {
        let options = SeedOptions::new()
            .concurrency(4)
            .on_error(|_, _| ErrorPolicy::Abort);
        assert_eq!(options.concurrency, Some(4));
        assert!(options.on_error.is_some());
    }

    #[test]
    fn test_seed_result_serializes() {
        let result = SeedResult {
            tenant_id: Some(TenantId::new("t1").unwrap()),
            success: false,
            skipped: false,
            error: Some("seed failed for 't1': duplicate key".to_string()),
            duration_ms: 3,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tenant_id"], "t1");
        assert_eq!(json["success"], false);
    }
}
