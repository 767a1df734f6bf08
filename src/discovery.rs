//! Tenant discovery.
//!
//! Embedders tell Tessera which tenants exist - usually by querying a
//! management table - through the [`TenantDiscovery`] trait.

use async_trait::async_trait;
use tessera_core::TenantId;

/// Errors a discovery implementation may return.
pub type DiscoveryError = Box<dyn std::error::Error + Send + Sync>;

/// Supplies the current tenant set.
#[async_trait]
pub trait TenantDiscovery: Send + Sync {
    /// List every tenant that should be managed.
    async fn tenant_ids(&self) -> Result<Vec<TenantId>, DiscoveryError>;
}

/// A fixed tenant list.
#[derive(Debug, Clone, Default)]
pub struct StaticTenants {
    ids: Vec<TenantId>,
}

impl StaticTenants {
    /// Wrap a fixed tenant list.
    pub fn new(ids: Vec<TenantId>) -> Self {
        Self { ids }
    }

    /// Parse a fixed tenant list from strings.
    pub fn parse<I, S>(ids: I) -> Result<Self, tessera_core::CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = ids
            .into_iter()
            .map(|s| TenantId::new(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ids })
    }
}

#[async_trait]
impl TenantDiscovery for StaticTenants {
    async fn tenant_ids(&self) -> Result<Vec<TenantId>, DiscoveryError> {
        Ok(self.ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tenants() {
        let discovery = StaticTenants::parse(["t1", "t2"]).unwrap();
        let ids = discovery.tenant_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "t1");

        assert!(StaticTenants::parse(["not valid!"]).is_err());
    }
}
