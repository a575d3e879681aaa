//! Agent modules for the Federation Sync service
//!
//! - `service_sync`: Service discovery, identity, and the two sync paths
//! - `lifecycle`: Startup ordering and graceful shutdown

pub mod lifecycle;
pub mod service_sync;

pub use lifecycle::LifecycleSupervisor;
