//! The facade.
//!
//! [`Tessera`] wires the pool manager, schema manager, migration engine,
//! sync manager, drift detector, and seeder together behind one surface,
//! and resolves the tenant fleet through the configured discovery.

use std::sync::Arc;

use tessera_core::{SchemaName, TenantId};
use tessera_migrate::{
    DriftOptions, DriftReport, DriftDetector, MigrateAllOptions, MigrateAllResult,
    MigrateOptions, MigrationFile, SchemaSnapshot, SeedAllResult, SeedOptions, SeedResult,
    Seeder, SharedMigrationResult, SharedMigrator, SharedSeed, SharedStatus, StatusReport,
    SyncManager, SyncMutationReport, SyncReport, TenantDrift, TenantMigrationResult,
    TenantMigrator, TenantSeed, TenantStatus,
};
use tessera_postgres::{
    DropSchemaOptions, HealthCheckOptions, HealthReport, PgConfig, PoolManager,
    PoolManagerOptions, PoolMetrics, SchemaManager, TenantDb,
};
use tracing::info;

use crate::config::TesseraConfig;
use crate::context::TenantContext;
use crate::discovery::TenantDiscovery;
use crate::error::{Error, Result};

const DEFAULT_CONCURRENCY: usize = 10;

/// Schema-per-tenant lifecycle management for one PostgreSQL cluster.
///
/// Cheap to clone; clones share the pool cache.
#[derive(Clone)]
pub struct Tessera {
    manager: PoolManager,
    schemas: SchemaManager,
    migrator: TenantMigrator,
    shared_migrator: SharedMigrator,
    sync: SyncManager,
    drift: DriftDetector,
    seeder: Seeder,
    discovery: Arc<dyn TenantDiscovery>,
}

impl Tessera {
    /// Build the facade from a validated configuration.
    pub fn new(config: TesseraConfig) -> Result<Self> {
        config.validate()?;

        let pg_config = PgConfig::from_url(&config.connection.url)?;
        let shared_schema = SchemaName::new(&config.isolation.shared_schema)?;
        let options = PoolManagerOptions::new()
            .max_pools(config.isolation.max_pools)
            .pool_ttl(config.isolation.pool_ttl)
            .shared_schema(shared_schema);

        let manager = PoolManager::new(
            pg_config,
            config.connection.pool.clone(),
            config.connection.retry.clone(),
            config.isolation.schema_name_template.clone(),
            options,
            config.hooks.clone(),
        )?;

        let schemas = SchemaManager::new(manager.clone());
        let migrator = TenantMigrator::new(
            manager.clone(),
            config.migrations.clone(),
            config.hooks.clone(),
        );
        let shared_migrator = SharedMigrator::new(manager.clone(), config.migrations.clone());
        let sync = SyncManager::new(manager.clone(), config.migrations.clone());
        let drift = DriftDetector::new(manager.clone(), config.migrations.clone());
        let seeder = Seeder::new(manager.clone());

        info!(max_pools = config.isolation.max_pools, "tessera initialized");
        Ok(Self {
            manager,
            schemas,
            migrator,
            shared_migrator,
            sync,
            drift,
            seeder,
            discovery: config.discovery,
        })
    }

    /// The underlying pool manager.
    pub fn pool_manager(&self) -> &PoolManager {
        &self.manager
    }

    /// The underlying schema manager.
    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schemas
    }

    /// List non-system schemas in the cluster.
    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        Ok(self.schemas.list_schemas().await?)
    }

    async fn discover(&self) -> Result<Vec<TenantId>> {
        self.discovery
            .tenant_ids()
            .await
            .map_err(|e| Error::discovery(e.to_string()))
    }

    async fn tenant_files(&self) -> Result<Vec<MigrationFile>> {
        Ok(self.migrator.load_migrations().await?)
    }

    // --- Manager surface -------------------------------------------------

    /// Get (or lazily create) the pool handle for a tenant.
    pub async fn get_db(&self, tenant_id: &TenantId) -> Result<TenantDb> {
        Ok(self.manager.get_db(tenant_id).await?)
    }

    /// Get (or lazily create) the shared pool handle.
    pub async fn get_shared_db(&self) -> Result<TenantDb> {
        Ok(self.manager.get_shared_db().await?)
    }

    /// Map a tenant id to its schema name.
    pub fn get_schema_name(&self, tenant_id: &TenantId) -> Result<SchemaName> {
        Ok(self.manager.schema_name(tenant_id)?)
    }

    /// Whether a live pool exists for the tenant.
    pub async fn has_pool(&self, tenant_id: &TenantId) -> Result<bool> {
        Ok(self.manager.has_pool(tenant_id).await?)
    }

    /// Number of live tenant pools.
    pub async fn get_pool_count(&self) -> usize {
        self.manager.pool_count().await
    }

    /// Tenants with a live pool.
    pub async fn get_active_tenant_ids(&self) -> Vec<TenantId> {
        self.manager.active_tenant_ids().await
    }

    /// Evict a tenant's pool. Returns whether one was evicted.
    pub async fn evict_pool(&self, tenant_id: &TenantId) -> Result<bool> {
        Ok(self.manager.evict_pool(tenant_id).await?)
    }

    /// Eagerly create pools for the given tenants.
    pub async fn warmup(&self, tenant_ids: &[TenantId]) -> Result<usize> {
        Ok(self.manager.warmup(tenant_ids).await?)
    }

    /// Probe pool health.
    pub async fn health_check(&self, options: HealthCheckOptions) -> Result<HealthReport> {
        Ok(self.manager.health_check(options).await?)
    }

    /// Read-only pool statistics.
    pub async fn get_metrics(&self) -> PoolMetrics {
        self.manager.metrics().await
    }

    /// Tear down every pool and stop background tasks.
    pub async fn dispose(&self) -> Result<()> {
        Ok(self.manager.dispose().await?)
    }

    /// Build a per-request context for a tenant.
    pub async fn context(&self, tenant_id: &TenantId) -> Result<TenantContext> {
        let tenant_db = self.get_db(tenant_id).await?;
        let shared_db = self.get_shared_db().await?;
        Ok(TenantContext::new(tenant_id.clone(), tenant_db, shared_db))
    }

    // --- Tenant lifecycle ------------------------------------------------

    /// Create a tenant's schema and run its migrations.
    pub async fn create_tenant(&self, tenant_id: &TenantId) -> Result<TenantMigrationResult> {
        self.schemas.create_schema(tenant_id).await?;
        self.migrate_tenant(tenant_id, &MigrateOptions::new()).await
    }

    /// Drop a tenant's schema (evicting its pool first).
    pub async fn drop_tenant(
        &self,
        tenant_id: &TenantId,
        options: DropSchemaOptions,
    ) -> Result<()> {
        Ok(self.schemas.drop_schema(tenant_id, options).await?)
    }

    /// Whether the tenant's schema exists.
    pub async fn tenant_exists(&self, tenant_id: &TenantId) -> Result<bool> {
        Ok(self.schemas.schema_exists(tenant_id).await?)
    }

    // --- Migrations ------------------------------------------------------

    /// Migrate every discovered tenant.
    pub async fn migrate_all(&self, options: &MigrateAllOptions) -> Result<MigrateAllResult> {
        let tenant_ids = self.discover().await?;
        Ok(self.migrator.migrate_all(tenant_ids, options).await?)
    }

    /// Migrate a specific set of tenants.
    pub async fn migrate_tenants(
        &self,
        tenant_ids: Vec<TenantId>,
        options: &MigrateAllOptions,
    ) -> Result<MigrateAllResult> {
        Ok(self.migrator.migrate_all(tenant_ids, options).await?)
    }

    /// Migrate one tenant.
    pub async fn migrate_tenant(
        &self,
        tenant_id: &TenantId,
        options: &MigrateOptions,
    ) -> Result<TenantMigrationResult> {
        let files = self.tenant_files().await?;
        Ok(self.migrator.migrate_tenant(tenant_id, &files, options).await?)
    }

    /// Record one tenant's pending migrations without executing SQL.
    pub async fn mark_as_applied(&self, tenant_id: &TenantId) -> Result<TenantMigrationResult> {
        let files = self.tenant_files().await?;
        Ok(self.migrator.mark_as_applied(tenant_id, &files).await?)
    }

    /// Record every discovered tenant's pending migrations.
    pub async fn mark_all_as_applied(
        &self,
        options: &MigrateAllOptions,
    ) -> Result<MigrateAllResult> {
        let tenant_ids = self.discover().await?;
        Ok(self.migrator.mark_all_as_applied(tenant_ids, options).await?)
    }

    /// Applied/pending status for every discovered tenant.
    pub async fn get_status(&self) -> Result<StatusReport> {
        let tenant_ids = self.discover().await?;
        Ok(self.migrator.status(tenant_ids, DEFAULT_CONCURRENCY).await?)
    }

    /// Applied/pending status for one tenant.
    pub async fn get_tenant_status(&self, tenant_id: &TenantId) -> Result<TenantStatus> {
        let files = self.tenant_files().await?;
        Ok(self.migrator.tenant_status(tenant_id, &files).await?)
    }

    // --- Sync ------------------------------------------------------------

    /// Disk ↔ tracking-table reconciliation status for the fleet.
    pub async fn get_sync_status(&self) -> Result<SyncReport> {
        let tenant_ids = self.discover().await?;
        Ok(self
            .sync
            .sync_status_all(tenant_ids, DEFAULT_CONCURRENCY)
            .await?)
    }

    /// Insert tracking rows for one tenant's unrecorded migrations.
    pub async fn mark_missing(&self, tenant_id: &TenantId) -> Result<SyncMutationReport> {
        let files = self.tenant_files().await?;
        Ok(self.sync.mark_missing(tenant_id, &files).await?)
    }

    /// Insert tracking rows for every tenant's unrecorded migrations.
    pub async fn mark_all_missing(
        &self,
    ) -> Result<Vec<(TenantId, tessera_migrate::MigrateResult<SyncMutationReport>)>> {
        let tenant_ids = self.discover().await?;
        Ok(self
            .sync
            .mark_all_missing(tenant_ids, DEFAULT_CONCURRENCY)
            .await?)
    }

    /// Delete one tenant's tracking rows that match no file.
    pub async fn clean_orphans(&self, tenant_id: &TenantId) -> Result<SyncMutationReport> {
        let files = self.tenant_files().await?;
        Ok(self.sync.clean_orphans(tenant_id, &files).await?)
    }

    /// Delete every tenant's tracking rows that match no file.
    pub async fn clean_all_orphans(
        &self,
    ) -> Result<Vec<(TenantId, tessera_migrate::MigrateResult<SyncMutationReport>)>> {
        let tenant_ids = self.discover().await?;
        Ok(self
            .sync
            .clean_all_orphans(tenant_ids, DEFAULT_CONCURRENCY)
            .await?)
    }

    // --- Drift -----------------------------------------------------------

    /// Compare every discovered tenant against a reference tenant.
    pub async fn get_schema_drift(&self, options: &DriftOptions) -> Result<DriftReport> {
        let tenant_ids = self.discover().await?;
        Ok(self.drift.detect(tenant_ids, options).await?)
    }

    /// Drift of one tenant against the reference.
    pub async fn get_tenant_schema_drift(
        &self,
        tenant_id: &TenantId,
        options: &DriftOptions,
    ) -> Result<TenantDrift> {
        let reference = match &options.reference_tenant {
            Some(reference) => reference.clone(),
            None => self
                .discover()
                .await?
                .into_iter()
                .next()
                .ok_or(Error::Migration(tessera_migrate::MigrationError::NoTenants))?,
        };
        let mut options = options.clone();
        options.reference_tenant = Some(reference.clone());
        options.tenant_ids = Some(vec![reference, tenant_id.clone()]);

        let report = self.drift.detect(Vec::new(), &options).await?;
        report
            .details
            .into_iter()
            .find(|d| &d.tenant_id == tenant_id)
            .ok_or_else(|| Error::discovery(format!("tenant '{tenant_id}' not in drift report")))
    }

    /// Introspect one tenant's schema.
    pub async fn introspect_tenant_schema(&self, tenant_id: &TenantId) -> Result<SchemaSnapshot> {
        let options = tessera_migrate::IntrospectOptions {
            exclude_tables: vec![self.migrator.settings().migrations_table.clone()],
            ..Default::default()
        };
        Ok(self.drift.introspect_tenant(tenant_id, &options).await?)
    }

    // --- Seeding ---------------------------------------------------------

    /// Seed one tenant.
    pub async fn seed_tenant(
        &self,
        tenant_id: &TenantId,
        seed: &dyn TenantSeed,
    ) -> Result<SeedResult> {
        Ok(self.seeder.seed_tenant(tenant_id, seed).await?)
    }

    /// Seed every discovered tenant.
    pub async fn seed_all(
        &self,
        seed: &dyn TenantSeed,
        options: &SeedOptions,
    ) -> Result<SeedAllResult> {
        let tenant_ids = self.discover().await?;
        Ok(self.seeder.seed_tenants(tenant_ids, seed, options).await?)
    }

    /// Seed a specific set of tenants.
    pub async fn seed_tenants(
        &self,
        tenant_ids: Vec<TenantId>,
        seed: &dyn TenantSeed,
        options: &SeedOptions,
    ) -> Result<SeedAllResult> {
        Ok(self.seeder.seed_tenants(tenant_ids, seed, options).await?)
    }

    /// Seed the shared schema once.
    pub async fn seed_shared(&self, seed: &dyn SharedSeed) -> Result<SeedResult> {
        Ok(self.seeder.seed_shared(seed).await?)
    }

    // --- Shared migrations -----------------------------------------------

    /// Apply pending shared-schema migrations.
    pub async fn migrate_shared(&self, dry_run: bool) -> Result<SharedMigrationResult> {
        Ok(self.shared_migrator.migrate(dry_run).await?)
    }

    /// Record pending shared-schema migrations without executing SQL.
    pub async fn mark_shared_as_applied(&self) -> Result<SharedMigrationResult> {
        Ok(self.shared_migrator.mark_as_applied().await?)
    }

    /// Applied/pending status for the shared schema.
    pub async fn get_shared_status(&self) -> Result<SharedStatus> {
        Ok(self.shared_migrator.status().await?)
    }
}

impl std::fmt::Debug for Tessera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tessera")
            .field("manager", &self.manager)
            .finish()
    }
}
