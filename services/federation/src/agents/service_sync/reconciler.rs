//! Service Reconciler
//!
//! Level-triggered sync path. A work item only says "this key may have
//! changed"; the reconciler re-reads the Service from the cache and writes
//! the desired state unconditionally:
//!
//! - **Found**: upsert through `ResourceStore::update`. The store is
//!   keyed-upsert, so a missing record is created rather than an error.
//! - **NotFound**: delete the derived id. A store that no longer holds it
//!   counts as success.
//! - **Lookup error**: reported; the item fails and is not retried here.
//!
//! Because every pass starts from a fresh read, duplicate, reordered or
//! coalesced notifications converge on the cluster's current state.
//!
//! With a bridge attached, notifications are parked per key and forwarded by
//! the worker holding that key, right before its reconcile pass. Store calls
//! for one key therefore never overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::discovery::ServiceSource;
use super::events::EventBridge;
use super::identity::IdentifierScheme;
use super::queue::WorkQueue;
use super::store::ResourceStore;
use super::types::{ServiceEvent, ServiceKey};
use crate::error::{StoreError, StoreOp, SyncError};

/// What a reconcile pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Upserted(String),
    Deleted(String),
    /// Service absent and the store already had no record for it
    AlreadyAbsent(String),
}

pub struct ServiceReconciler {
    source: Arc<dyn ServiceSource>,
    store: Arc<dyn ResourceStore>,
    scheme: IdentifierScheme,
    queue: Arc<WorkQueue>,
    workers: usize,
    bridge: Option<EventBridge>,
    pending: Mutex<HashMap<ServiceKey, Vec<ServiceEvent>>>,
}

impl ServiceReconciler {
    pub fn new(
        source: Arc<dyn ServiceSource>,
        store: Arc<dyn ResourceStore>,
        scheme: IdentifierScheme,
        workers: usize,
    ) -> Self {
        Self {
            source,
            store,
            scheme,
            queue: Arc::new(WorkQueue::new()),
            workers: workers.max(1),
            bridge: None,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Forward each notification through `bridge` before reconciling its key.
    pub fn with_bridge(mut self, bridge: EventBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Queue a key for reconciliation.
    pub fn enqueue(&self, key: ServiceKey) {
        if !self.queue.add(key.clone()) {
            debug!(service = %key, "Reconcile queue is shut down, dropping key");
        }
    }

    /// Hand a notification to the workers. Without a bridge only the key is
    /// kept; with one, the notification waits for the worker claiming the key.
    pub fn notify(&self, event: ServiceEvent) {
        let key = event.key();
        if self.bridge.is_some() {
            if self.queue.is_shutting_down() {
                debug!(service = %key, "Reconcile queue is shut down, dropping notification");
                return;
            }
            self.lock_pending().entry(key.clone()).or_default().push(event);
        }
        self.enqueue(key);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<ServiceKey, Vec<ServiceEvent>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forward the notifications parked for `key`, oldest first.
    async fn forward_pending(&self, key: &ServiceKey) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        let events = self.lock_pending().remove(key).unwrap_or_default();
        for event in &events {
            // Failures are logged by the bridge; the reconcile pass follows.
            let _ = bridge.handle(event).await;
        }
    }

    /// Reconcile one Service against the store.
    pub async fn reconcile(&self, key: &ServiceKey) -> Result<ReconcileOutcome, SyncError> {
        let id = self.scheme.derive_key(key);

        let record = self.source.get(key).await.map_err(|e| {
            error!(service = %key, error = %e, "Could not fetch Service");
            SyncError::LookupFailed {
                key: key.clone(),
                source: e,
            }
        })?;

        match record {
            Some(record) => {
                info!(service = %key, id = %id, "Reconciling Service");
                let resource = self.scheme.resource_for(&record);
                self.store.update(resource).await.map_err(|e| {
                    error!(service = %key, id = %id, error = %e, "Error occurred while updating federated resource");
                    SyncError::StoreCallFailed {
                        op: StoreOp::Update,
                        id: id.clone(),
                        source: e,
                    }
                })?;
                info!(service = %key, id = %id, "Successfully updated federated resource");
                Ok(ReconcileOutcome::Upserted(id))
            }
            None => {
                warn!(service = %key, id = %id, "Could not find Service, deleting federated resource");
                match self.store.delete(&id).await {
                    Ok(()) => {
                        info!(service = %key, id = %id, "Successfully deleted federated resource");
                        Ok(ReconcileOutcome::Deleted(id))
                    }
                    Err(StoreError::NotFound(_)) => {
                        debug!(service = %key, id = %id, "Federated resource already absent");
                        Ok(ReconcileOutcome::AlreadyAbsent(id))
                    }
                    Err(e) => {
                        error!(service = %key, id = %id, error = %e, "Error occurred while deleting federated resource");
                        Err(SyncError::StoreCallFailed {
                            op: StoreOp::Delete,
                            id,
                            source: e,
                        })
                    }
                }
            }
        }
    }

    /// Spawn the worker pool. Workers exit once the queue is shut down.
    pub fn spawn_workers(self: &Arc<Self>) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let reconciler = self.clone();
            workers.spawn(async move { reconciler.work(worker).await });
        }
        info!(workers = self.workers, "Started reconcile workers");
        workers
    }

    async fn work(&self, worker: usize) {
        while let Some(key) = self.queue.next().await {
            self.forward_pending(&key).await;
            // Failures are logged in `reconcile`; the next notification for
            // this key triggers another pass.
            let _ = self.reconcile(&key).await;
            self.queue.done(&key);
        }
        debug!(worker, "Reconcile worker stopped");
    }
}
