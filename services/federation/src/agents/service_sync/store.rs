//! Resource Store Seam
//!
//! The registry that federated resources are written to. Implementations
//! live in `tools` (embedded registry, remote HTTP registry).

use async_trait::async_trait;

use super::types::FederatedResource;
use crate::error::StoreError;

/// Keyed-upsert store of federated resources.
///
/// `create` and `update` must be idempotent: repeating a call with the same
/// payload converges on one record. Implementations are shared across
/// workers and must be safe for concurrent use.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &str;

    async fn create(&self, resource: FederatedResource) -> Result<(), StoreError>;

    async fn update(&self, resource: FederatedResource) -> Result<(), StoreError>;

    /// Remove a resource. Absent ids yield `StoreError::NotFound`.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
