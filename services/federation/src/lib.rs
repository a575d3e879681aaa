//! Lornu AI Service Federation
//!
//! Syncs Kubernetes Services into a federated resource registry.

pub mod agents;
pub mod config;
pub mod error;
pub mod tools;

pub use agents::lifecycle::{start, LifecycleSupervisor};
pub use config::{FederationArgs, FederationConfig, LogFormat};
pub use error::{ConfigError, SourceError, StoreError, SyncError};
