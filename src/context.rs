//! Per-request tenant context.
//!
//! Web-framework adapters resolve a tenant (from a header, subdomain, or
//! token) and build one of these per request; handlers then talk to the
//! right schema without knowing about pooling.

use tessera_core::TenantId;
use tessera_postgres::TenantDb;

/// Everything one request needs: who the tenant is and both database
/// handles.
///
/// Handles borrow the pools owned by the manager; they stay valid until
/// the tenant's pool is evicted, after which acquisition fails and the
/// adapter builds a fresh context.
#[derive(Clone, Debug)]
pub struct TenantContext {
    tenant_id: TenantId,
    tenant_db: TenantDb,
    shared_db: TenantDb,
}

impl TenantContext {
    /// Assemble a context.
    pub fn new(tenant_id: TenantId, tenant_db: TenantDb, shared_db: TenantDb) -> Self {
        Self {
            tenant_id,
            tenant_db,
            shared_db,
        }
    }

    /// The resolved tenant.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Handle to the tenant's schema.
    pub fn tenant_db(&self) -> &TenantDb {
        &self.tenant_db
    }

    /// Handle to the shared schema.
    pub fn shared_db(&self) -> &TenantDb {
        &self.shared_db
    }
}
