//! Service Federation Types
//!
//! Core types shared by the sync paths, the snapshot provider and the
//! registry surface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a Service within the cluster.
///
/// Ordered by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A Service as observed in the cluster.
///
/// Labels and annotations are carried along but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.name, &self.namespace)
    }
}

/// The registry representation of a Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedResource {
    /// Stable federated id (`name.namespace.domain`)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Free-form provenance note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A Service lifecycle notification from the cluster watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Added(ServiceRecord),
    Updated {
        old: ServiceRecord,
        new: ServiceRecord,
    },
    Deleted(ServiceRecord),
}

impl ServiceEvent {
    /// Identity the notification is about. For updates this is the new record's.
    pub fn key(&self) -> ServiceKey {
        match self {
            ServiceEvent::Added(record) | ServiceEvent::Deleted(record) => record.key(),
            ServiceEvent::Updated { new, .. } => new.key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceEvent::Added(_) => "add",
            ServiceEvent::Updated { .. } => "update",
            ServiceEvent::Deleted(_) => "delete",
        }
    }
}
