//! Service Federation Sync Agent
//!
//! Keeps a federated resource registry in step with the Kubernetes
//! `Service` objects of one cluster. The cluster is the source of truth and
//! the registry is the sink; the agent holds no durable state of its own.
//!
//! ## Architecture
//!
//! - **Identity**: `name.namespace.domain` ids, stable across observations
//! - **Discovery**: reflector cache + watch turned into Add/Update/Delete
//! - **Sync paths**: edge-triggered `EventBridge`, level-triggered
//!   `ServiceReconciler`, or both (`SyncMode::Hybrid`)
//! - **Snapshot**: full registry payload for newly attached consumers

mod discovery;
mod events;
mod identity;
mod queue;
mod reconciler;
mod snapshot;
mod store;
mod sync;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::*;
pub use events::*;
pub use identity::*;
pub use queue::WorkQueue;
pub use reconciler::*;
pub use snapshot::*;
pub use store::*;
pub use sync::*;
pub use types::*;
