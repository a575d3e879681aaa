//! Sync Path Selection
//!
//! The two sync paths share one entry point, `SyncPath::synchronize`, which
//! consumes Service notifications and drives store mutations. The path is
//! picked once at startup.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::discovery::ServiceSource;
use super::events::EventBridge;
use super::identity::IdentifierScheme;
use super::reconciler::ServiceReconciler;
use super::store::ResourceStore;
use super::types::ServiceEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    /// Re-read each changed key and write its current state
    #[default]
    Reconcile,
    /// Forward each notification as one store call
    Events,
    /// Forward each notification, then confirm the key by reconciling it.
    /// Both steps run on the worker holding the key.
    Hybrid,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Reconcile => write!(f, "reconcile"),
            SyncMode::Events => write!(f, "events"),
            SyncMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

pub enum SyncPath {
    Events(EventBridge),
    Reconcile(Arc<ServiceReconciler>),
    /// Reconciler with the bridge attached
    Hybrid(Arc<ServiceReconciler>),
}

impl SyncPath {
    pub fn new(
        mode: SyncMode,
        source: Arc<dyn ServiceSource>,
        store: Arc<dyn ResourceStore>,
        scheme: IdentifierScheme,
        workers: usize,
    ) -> Self {
        match mode {
            SyncMode::Events => SyncPath::Events(EventBridge::new(store, scheme)),
            SyncMode::Reconcile => {
                SyncPath::Reconcile(Arc::new(ServiceReconciler::new(source, store, scheme, workers)))
            }
            SyncMode::Hybrid => {
                let bridge = EventBridge::new(store.clone(), scheme.clone());
                SyncPath::Hybrid(Arc::new(
                    ServiceReconciler::new(source, store, scheme, workers).with_bridge(bridge),
                ))
            }
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self {
            SyncPath::Events(_) => SyncMode::Events,
            SyncPath::Reconcile(_) => SyncMode::Reconcile,
            SyncPath::Hybrid(_) => SyncMode::Hybrid,
        }
    }

    /// Drive store mutations from `events` until the channel closes or
    /// shutdown is requested. In-flight store calls are allowed to finish.
    pub async fn synchronize(self, events: mpsc::Receiver<ServiceEvent>, shutdown: CancellationToken) {
        info!(mode = %self.mode(), "Starting sync path");

        match self {
            SyncPath::Events(bridge) => {
                bridge.run(events, shutdown).await;
            }
            SyncPath::Reconcile(reconciler) | SyncPath::Hybrid(reconciler) => {
                run_reconciler(reconciler, events, shutdown).await;
            }
        }

        info!("Sync path stopped");
    }
}

async fn run_reconciler(
    reconciler: Arc<ServiceReconciler>,
    mut events: mpsc::Receiver<ServiceEvent>,
    shutdown: CancellationToken,
) {
    let mut workers = reconciler.spawn_workers();

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        reconciler.notify(event);
    }

    // Stop handing out keys; workers finish the pass they are in.
    reconciler.queue().shutdown();
    while workers.join_next().await.is_some() {}
}
