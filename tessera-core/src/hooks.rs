//! Lifecycle hook callbacks.
//!
//! Hooks are plain closures supplied by the embedder. Every invocation is
//! trapped: a panicking hook is logged and the surrounding operation
//! continues.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

use crate::tenant::TenantId;

type TenantHook = Arc<dyn Fn(&TenantId) + Send + Sync>;
type TenantResultHook = Arc<dyn Fn(&TenantId, bool) + Send + Sync>;
type MigrationHook = Arc<dyn Fn(&TenantId, &str) + Send + Sync>;
type MigrationResultHook = Arc<dyn Fn(&TenantId, &str, bool) + Send + Sync>;

/// Callbacks fired around pool and migration lifecycle transitions.
#[derive(Clone, Default)]
pub struct Hooks {
    on_pool_created: Option<TenantHook>,
    on_pool_evicted: Option<TenantHook>,
    before_tenant: Option<TenantHook>,
    after_tenant: Option<TenantResultHook>,
    before_migration: Option<MigrationHook>,
    after_migration: Option<MigrationResultHook>,
}

impl Hooks {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a tenant pool has been created and initialized.
    pub fn on_pool_created(mut self, f: impl Fn(&TenantId) + Send + Sync + 'static) -> Self {
        self.on_pool_created = Some(Arc::new(f));
        self
    }

    /// Called after a tenant pool has been evicted and quiesced.
    pub fn on_pool_evicted(mut self, f: impl Fn(&TenantId) + Send + Sync + 'static) -> Self {
        self.on_pool_evicted = Some(Arc::new(f));
        self
    }

    /// Called before a tenant's migration run starts.
    pub fn before_tenant(mut self, f: impl Fn(&TenantId) + Send + Sync + 'static) -> Self {
        self.before_tenant = Some(Arc::new(f));
        self
    }

    /// Called after a tenant's migration run finished; the flag reports
    /// success.
    pub fn after_tenant(mut self, f: impl Fn(&TenantId, bool) + Send + Sync + 'static) -> Self {
        self.after_tenant = Some(Arc::new(f));
        self
    }

    /// Called before each individual migration, with its name.
    pub fn before_migration(
        mut self,
        f: impl Fn(&TenantId, &str) + Send + Sync + 'static,
    ) -> Self {
        self.before_migration = Some(Arc::new(f));
        self
    }

    /// Called after each individual migration, with its name and whether it
    /// committed.
    pub fn after_migration(
        mut self,
        f: impl Fn(&TenantId, &str, bool) + Send + Sync + 'static,
    ) -> Self {
        self.after_migration = Some(Arc::new(f));
        self
    }

    /// Fire `on_pool_created`.
    pub fn fire_pool_created(&self, tenant_id: &TenantId) {
        if let Some(hook) = &self.on_pool_created {
            trap("on_pool_created", || hook(tenant_id));
        }
    }

    /// Fire `on_pool_evicted`.
    pub fn fire_pool_evicted(&self, tenant_id: &TenantId) {
        if let Some(hook) = &self.on_pool_evicted {
            trap("on_pool_evicted", || hook(tenant_id));
        }
    }

    /// Fire `before_tenant`.
    pub fn fire_before_tenant(&self, tenant_id: &TenantId) {
        if let Some(hook) = &self.before_tenant {
            trap("before_tenant", || hook(tenant_id));
        }
    }

    /// Fire `after_tenant`.
    pub fn fire_after_tenant(&self, tenant_id: &TenantId, success: bool) {
        if let Some(hook) = &self.after_tenant {
            trap("after_tenant", || hook(tenant_id, success));
        }
    }

    /// Fire `before_migration`.
    pub fn fire_before_migration(&self, tenant_id: &TenantId, name: &str) {
        if let Some(hook) = &self.before_migration {
            trap("before_migration", || hook(tenant_id, name));
        }
    }

    /// Fire `after_migration`.
    pub fn fire_after_migration(&self, tenant_id: &TenantId, name: &str, success: bool) {
        if let Some(hook) = &self.after_migration {
            trap("after_migration", || hook(tenant_id, name, success));
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_pool_created", &self.on_pool_created.is_some())
            .field("on_pool_evicted", &self.on_pool_evicted.is_some())
            .field("before_tenant", &self.before_tenant.is_some())
            .field("after_tenant", &self.after_tenant.is_some())
            .field("before_migration", &self.before_migration.is_some())
            .field("after_migration", &self.after_migration.is_some())
            .finish()
    }
}

/// Run a hook, containing panics.
fn trap(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(hook = name, "hook panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_fire_records_calls() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let hooks = Hooks::new().on_pool_created(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let tenant = TenantId::new("t1").unwrap();
        hooks.fire_pool_created(&tenant);
        hooks.fire_pool_created(&tenant);
        assert_eq!(created.load(Ordering::SeqCst), 2);

        // Unset hooks are no-ops.
        hooks.fire_pool_evicted(&tenant);
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();
        let hooks = Hooks::new()
            .before_tenant(|_| panic!("boom"))
            .after_tenant(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let tenant = TenantId::new("t1").unwrap();
        hooks.fire_before_tenant(&tenant);
        hooks.fire_after_tenant(&tenant, true);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
