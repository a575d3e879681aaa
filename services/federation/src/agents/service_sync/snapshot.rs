//! Snapshot Provider
//!
//! Builds the initial payload for a newly attached registry consumer from
//! the full set of Services in the cluster cache.

use std::sync::Arc;
use tracing::{error, info};

use super::discovery::ServiceSource;
use super::identity::IdentifierScheme;
use super::types::FederatedResource;
use crate::error::SyncError;

#[derive(Clone)]
pub struct SnapshotProvider {
    source: Arc<dyn ServiceSource>,
    scheme: IdentifierScheme,
}

impl SnapshotProvider {
    pub fn new(source: Arc<dyn ServiceSource>, scheme: IdentifierScheme) -> Self {
        Self { source, scheme }
    }

    /// Every Service as a discovered resource, ordered by namespace then name.
    ///
    /// A cache read failure fails the whole snapshot; callers never see a
    /// truncated list.
    pub async fn snapshot(&self) -> Result<Vec<FederatedResource>, SyncError> {
        let mut records = self.source.list().await.map_err(|e| {
            error!(error = %e, "Unable to list Services for snapshot");
            SyncError::SnapshotFailed(e)
        })?;
        records.sort_by_key(|r| r.key());

        let resources: Vec<FederatedResource> = records
            .iter()
            .map(|r| self.scheme.discovered_resource_for(r))
            .collect();

        info!(resources = resources.len(), "Built registry snapshot");
        Ok(resources)
    }
}
