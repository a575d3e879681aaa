//! Registry tooling
//!
//! - `registry`: embedded registry store and its HTTP surface
//! - `store_client`: client for a remote registry

pub mod registry;
pub mod store_client;

pub use registry::{RegistryState, RegistryStore};
pub use store_client::{HttpResourceStore, TlsMaterial};
