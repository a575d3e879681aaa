//! Error taxonomy for the sync engine and its collaborators.

use thiserror::Error;

use crate::agents::service_sync::ServiceKey;

/// Store call kind, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreOp::Create => write!(f, "create"),
            StoreOp::Update => write!(f, "update"),
            StoreOp::Delete => write!(f, "delete"),
        }
    }
}

/// Failures reported by a `ResourceStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id is not held by the store. Deletes treat this as already done.
    #[error("federated resource {0} not found")]
    NotFound(String),

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store connection is closed")]
    Closed,
}

/// Failures reading the cluster state cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("service cache has not completed its initial sync")]
    NotReady,

    #[error("service watch has stopped")]
    Stopped,
}

/// Errors surfaced by the sync paths and the snapshot provider.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("lookup of service {key} failed: {source}")]
    LookupFailed {
        key: ServiceKey,
        #[source]
        source: SourceError,
    },

    #[error("store {op} for {id} failed: {source}")]
    StoreCallFailed {
        op: StoreOp,
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("snapshot failed: {0}")]
    SnapshotFailed(#[source] SourceError),
}

/// Invalid process configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("federation domain must be a non-empty dotted name, got {0:?}")]
    InvalidDomain(String),

    #[error("{0} must be at least 1")]
    ZeroValue(&'static str),

    #[error("--peer-cert and --peer-key must be given together")]
    IncompletePeerIdentity,

    #[error("invalid store url {0:?}: expected http:// or https://")]
    InvalidStoreUrl(String),
}
