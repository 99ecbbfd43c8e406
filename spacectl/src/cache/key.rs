//! Tenant-scoped cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use super::CacheError;
use crate::types::{ResourceId, TenantId};

/// Fingerprint of one tenant-scoped read.
///
/// Rendered as `<tenant>:<operation>:<sha256 of canonical args>`. There is no
/// constructor without a tenant, so two tenants issuing the same read never
/// share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant_id: TenantId,
    rendered: String,
}

impl CacheKey {
    /// Build a key from the operation name and its arguments.
    ///
    /// Arguments go through `serde_json::Value`, whose maps are ordered, so
    /// struct field or map insertion order does not change the fingerprint.
    pub fn new<A: Serialize + ?Sized>(tenant_id: TenantId, operation: &str, args: &A) -> Result<Self, CacheError> {
        let canonical = serde_json::to_value(args).and_then(|value| serde_json::to_vec(&value))?;
        let digest = Sha256::digest(&canonical);
        Ok(Self {
            tenant_id,
            rendered: format!("{tenant_id}:{operation}:{digest:x}"),
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

pub fn tenant_tag(tenant_id: TenantId) -> String {
    format!("tenant:{tenant_id}")
}

pub fn resource_tag(resource_id: ResourceId) -> String {
    format!("resource:{resource_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_key_embeds_tenant_and_operation() {
        let tenant = Uuid::new_v4();
        let key = CacheKey::new(tenant, "check_available", &(1, "a")).unwrap();
        assert!(key.as_str().starts_with(&format!("{tenant}:check_available:")));
        assert_eq!(key.tenant_id(), tenant);
        // sha256 hex digest
        assert_eq!(key.as_str().rsplit(':').next().unwrap().len(), 64);
    }

    #[test]
    fn test_same_args_different_tenants_differ() {
        let args = ("resource", 10, 11);
        let a = CacheKey::new(Uuid::new_v4(), "op", &args).unwrap();
        let b = CacheKey::new(Uuid::new_v4(), "op", &args).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_map_order_does_not_change_fingerprint() {
        let tenant = Uuid::new_v4();
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("b", 2), ("a", 1), ("c", 3)] {
            first.insert(k, v);
        }
        for (k, v) in [("c", 3), ("a", 1), ("b", 2)] {
            second.insert(k, v);
        }
        assert_eq!(
            CacheKey::new(tenant, "op", &first).unwrap(),
            CacheKey::new(tenant, "op", &second).unwrap()
        );
    }

    #[test]
    fn test_args_change_fingerprint() {
        let tenant = Uuid::new_v4();
        assert_ne!(
            CacheKey::new(tenant, "op", &[1, 2]).unwrap(),
            CacheKey::new(tenant, "op", &[2, 1]).unwrap()
        );
        assert_ne!(CacheKey::new(tenant, "op", &1).unwrap(), CacheKey::new(tenant, "other", &1).unwrap());
    }

    #[test]
    fn test_non_string_map_keys_fail() {
        let mut args = HashMap::new();
        args.insert((1, 2), "tuple keys are not representable in json");
        assert!(matches!(CacheKey::new(Uuid::new_v4(), "op", &args), Err(CacheError::Serialization(_))));
    }
}
