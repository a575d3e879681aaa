//! Event Bridge
//!
//! Edge-triggered sync path: every Service notification becomes exactly one
//! store call, chosen by the notification kind. Nothing is batched or
//! retried here; a failed call is logged and returned, and the stream moves on.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::identity::IdentifierScheme;
use super::store::ResourceStore;
use super::types::ServiceEvent;
use crate::error::{StoreOp, SyncError};

/// Counters for one bridge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub forwarded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct EventBridge {
    store: Arc<dyn ResourceStore>,
    scheme: IdentifierScheme,
}

impl EventBridge {
    pub fn new(store: Arc<dyn ResourceStore>, scheme: IdentifierScheme) -> Self {
        Self { store, scheme }
    }

    /// Forward one notification to the store.
    pub async fn handle(&self, event: &ServiceEvent) -> Result<(), SyncError> {
        let (op, id, result) = match event {
            ServiceEvent::Added(record) => {
                let resource = self.scheme.resource_for(record);
                let id = resource.id.clone();
                (StoreOp::Create, id, self.store.create(resource).await)
            }
            // The old record is never diffed; the new one is sent in full.
            ServiceEvent::Updated { new, .. } => {
                let resource = self.scheme.resource_for(new);
                let id = resource.id.clone();
                (StoreOp::Update, id, self.store.update(resource).await)
            }
            ServiceEvent::Deleted(record) => {
                let id = self.scheme.derive(&record.name, &record.namespace);
                let result = self.store.delete(&id).await;
                (StoreOp::Delete, id, result)
            }
        };

        match result {
            Ok(()) => {
                info!(service = %event.key(), id = %id, op = %op, "Forwarded Service change");
                Ok(())
            }
            Err(e) => {
                error!(service = %event.key(), id = %id, op = %op, error = %e, "Error occurred while forwarding Service change");
                Err(SyncError::StoreCallFailed { op, id, source: e })
            }
        }
    }

    /// Consume notifications in order until the channel closes or shutdown.
    ///
    /// Shutdown stops intake only; a call already in flight runs to completion.
    pub async fn run(&self, mut events: mpsc::Receiver<ServiceEvent>, shutdown: CancellationToken) -> BridgeStats {
        let mut stats = BridgeStats::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.handle(&event).await {
                Ok(()) => stats.forwarded += 1,
                Err(_) => stats.failed += 1,
            }
        }

        info!(forwarded = stats.forwarded, failed = stats.failed, store = self.store.name(), "Event bridge stopped");
        stats
    }
}
