//! Tenant identifiers and schema naming.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// PostgreSQL truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

static TENANT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

static SCHEMA_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_$-]*$").unwrap());

/// An opaque, validated tenant identifier.
///
/// Tenant ids must match `^[A-Za-z_][A-Za-z0-9_-]*$` and fit within the
/// PostgreSQL identifier limit of 63 bytes, so that any reasonable schema
/// template produces a usable schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant id.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::invalid_tenant_id(id, "must not be empty"));
        }
        if id.len() > MAX_IDENTIFIER_BYTES {
            return Err(CoreError::invalid_tenant_id(
                id,
                format!("exceeds {} bytes", MAX_IDENTIFIER_BYTES),
            ));
        }
        if !TENANT_ID_RE.is_match(&id) {
            return Err(CoreError::invalid_tenant_id(
                id,
                "must match ^[A-Za-z_][A-Za-z0-9_-]*$",
            ));
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated PostgreSQL schema name.
///
/// Schema names are always rendered double-quoted into SQL; validation
/// guarantees quoting can never be escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate and wrap a schema name.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty()
            || name.len() > MAX_IDENTIFIER_BYTES
            || !SCHEMA_NAME_RE.is_match(&name)
        {
            return Err(CoreError::InvalidSchemaName(name));
        }
        Ok(Self(name))
    }

    /// The raw (unquoted) name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name double-quoted for interpolation into SQL.
    ///
    /// Identifiers cannot be bound as `$n` parameters, so every statement
    /// that names a schema goes through this.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Maps a tenant id to the schema that holds its data.
///
/// The template is a pure function supplied by the embedder; the default
/// produces `tenant_<id>`. Whatever it returns is re-validated as a
/// PostgreSQL identifier before use.
#[derive(Clone)]
pub struct SchemaTemplate {
    template: Arc<dyn Fn(&TenantId) -> String + Send + Sync>,
}

impl SchemaTemplate {
    /// Create a template from a naming function.
    pub fn new(template: impl Fn(&TenantId) -> String + Send + Sync + 'static) -> Self {
        Self {
            template: Arc::new(template),
        }
    }

    /// Apply the template and validate the result.
    pub fn schema_name(&self, tenant_id: &TenantId) -> CoreResult<SchemaName> {
        SchemaName::new((self.template)(tenant_id))
    }
}

impl Default for SchemaTemplate {
    fn default() -> Self {
        Self::new(|id| format!("tenant_{}", id))
    }
}

impl fmt::Debug for SchemaTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchemaTemplate(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_valid() {
        assert!(TenantId::new("acme").is_ok());
        assert!(TenantId::new("_internal").is_ok());
        assert!(TenantId::new("t1-staging").is_ok());
        assert!(TenantId::new("Tenant_42").is_ok());
    }

    #[test]
    fn test_tenant_id_invalid() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("9lives").is_err());
        assert!(TenantId::new("-dash-first").is_err());
        assert!(TenantId::new("with space").is_err());
        assert!(TenantId::new("semi;colon").is_err());
        assert!(TenantId::new("a".repeat(64)).is_err());
        assert!(TenantId::new("a".repeat(63)).is_ok());
    }

    #[test]
    fn test_tenant_id_from_str() {
        let id: TenantId = "acme".parse().unwrap();
        assert_eq!(id.as_str(), "acme");
        assert!("bad id".parse::<TenantId>().is_err());
    }

    #[test]
    fn test_schema_name_quoting() {
        let name = SchemaName::new("tenant_acme").unwrap();
        assert_eq!(name.quoted(), "\"tenant_acme\"");
    }

    #[test]
    fn test_schema_name_rejects_quote_breakout() {
        assert!(SchemaName::new("x\"; DROP SCHEMA public; --").is_err());
        assert!(SchemaName::new("").is_err());
    }

    #[test]
    fn test_default_template() {
        let tenant = TenantId::new("acme").unwrap();
        let schema = SchemaTemplate::default().schema_name(&tenant).unwrap();
        assert_eq!(schema.as_str(), "tenant_acme");
    }

    #[test]
    fn test_custom_template_output_validated() {
        let tenant = TenantId::new("acme").unwrap();
        let template = SchemaTemplate::new(|id| format!("bad name {}", id));
        assert!(template.schema_name(&tenant).is_err());
    }

    #[test]
    fn test_template_overflow_rejected() {
        let tenant = TenantId::new("a".repeat(60)).unwrap();
        let template = SchemaTemplate::new(|id| format!("tenant_{}", id));
        assert!(template.schema_name(&tenant).is_err());
    }

    #[test]
    fn test_tenant_id_serde_round_trip() {
        let id = TenantId::new("acme").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"acme\"");
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TenantId>("\"not valid!\"").is_err());
    }
}
