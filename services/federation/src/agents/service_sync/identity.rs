//! Federated Identity Scheme
//!
//! Derives the stable registry id for a Service. The id is a fixed-format
//! concatenation of two DNS labels and the federation domain, so it is the
//! same on every observation and across restarts.

use super::types::{FederatedResource, ServiceKey, ServiceRecord};

/// Federation domain used when none is configured
pub const DEFAULT_FEDERATION_DOMAIN: &str = "federation.local";

/// Provenance note attached to snapshot entries
pub const DISCOVERED_DESCRIPTION: &str = "discovered Kubernetes service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierScheme {
    domain: String,
}

impl IdentifierScheme {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `name.namespace.domain`
    pub fn derive(&self, name: &str, namespace: &str) -> String {
        format!("{}.{}.{}", name, namespace, self.domain)
    }

    pub fn derive_key(&self, key: &ServiceKey) -> String {
        self.derive(&key.name, &key.namespace)
    }

    /// Resource written by the sync paths: named after the Service itself.
    pub fn resource_for(&self, record: &ServiceRecord) -> FederatedResource {
        FederatedResource {
            id: self.derive(&record.name, &record.namespace),
            name: record.name.clone(),
            description: None,
        }
    }

    /// Resource handed to a newly attached consumer, qualified by namespace.
    pub fn discovered_resource_for(&self, record: &ServiceRecord) -> FederatedResource {
        FederatedResource {
            id: self.derive(&record.name, &record.namespace),
            name: format!("{}-{}", record.name, record.namespace),
            description: Some(DISCOVERED_DESCRIPTION.to_string()),
        }
    }
}

impl Default for IdentifierScheme {
    fn default() -> Self {
        Self::new(DEFAULT_FEDERATION_DOMAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_format() {
        let scheme = IdentifierScheme::new("foo.com");
        assert_eq!(scheme.derive("payments", "billing"), "payments.billing.foo.com");
    }

    #[test]
    fn test_derive_is_deterministic() {
        let first = IdentifierScheme::new("mesh.example");
        let second = IdentifierScheme::new("mesh.example");

        for _ in 0..3 {
            assert_eq!(
                first.derive("payments", "billing"),
                second.derive("payments", "billing")
            );
        }
    }

    #[test]
    fn test_derive_is_injective_over_dns_labels() {
        let scheme = IdentifierScheme::default();
        let labels = ["a", "b", "ab", "a-b", "payments", "billing", "kube-system", "default"];

        let mut seen = HashSet::new();
        for name in labels {
            for namespace in labels {
                let id = scheme.derive(name, namespace);
                assert!(seen.insert(id.clone()), "collision on {}", id);
            }
        }
        assert_eq!(seen.len(), labels.len() * labels.len());
    }

    #[test]
    fn test_resource_for_uses_service_name() {
        let scheme = IdentifierScheme::new("foo.com");
        let record = ServiceRecord::new("payments", "billing");

        let resource = scheme.resource_for(&record);
        assert_eq!(resource.id, "payments.billing.foo.com");
        assert_eq!(resource.name, "payments");
        assert_eq!(resource.description, None);
    }

    #[test]
    fn test_discovered_resource_is_qualified() {
        let scheme = IdentifierScheme::new("foo.com");
        let record = ServiceRecord::new("payments", "billing");

        let resource = scheme.discovered_resource_for(&record);
        assert_eq!(resource.id, "payments.billing.foo.com");
        assert_eq!(resource.name, "payments-billing");
        assert_eq!(resource.description.as_deref(), Some(DISCOVERED_DESCRIPTION));
    }
}
