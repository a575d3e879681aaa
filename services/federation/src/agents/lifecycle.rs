//! Federation Lifecycle
//!
//! Startup and shutdown ordering for the sync agent:
//!
//! 1. Store: embedded registry (listener bound) or remote registry (reachable)
//! 2. Kubernetes client and Service watch/cache
//! 3. Registry HTTP surface (embedded store only)
//! 4. Sync path, then the watch that feeds it
//!
//! On SIGINT/SIGTERM intake stops, in-flight store calls finish on their own,
//! the supervisor waits up to the drain timeout and then closes the store.
//! Only failures during steps 1-2 end the process with an error.

use anyhow::{bail, Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::service_sync::{
    IdentifierScheme, ResourceStore, ServiceEvent, ServiceSource, ServiceWatcher, SnapshotProvider,
    SyncMode, SyncPath,
};
use crate::config::FederationConfig;
use crate::tools::registry::{router, RegistryState, RegistryStore};
use crate::tools::HttpResourceStore;

/// Sync settings handed to the supervisor
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub scheme: IdentifierScheme,
    pub mode: SyncMode,
    pub workers: usize,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl From<&FederationConfig> for SyncSettings {
    fn from(config: &FederationConfig) -> Self {
        Self {
            scheme: config.scheme.clone(),
            mode: config.sync_mode,
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            drain_timeout: config.drain_timeout,
        }
    }
}

/// Owns the store connection and every long-running task.
///
/// Collaborators are passed in explicitly; nothing is registered globally.
pub struct LifecycleSupervisor {
    settings: SyncSettings,
    store: Arc<dyn ResourceStore>,
    source: Arc<dyn ServiceSource>,
    shutdown: CancellationToken,
    events_tx: mpsc::Sender<ServiceEvent>,
    events_rx: Option<mpsc::Receiver<ServiceEvent>>,
    tasks: JoinSet<()>,
}

impl LifecycleSupervisor {
    pub fn new(settings: SyncSettings, store: Arc<dyn ResourceStore>, source: Arc<dyn ServiceSource>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.queue_capacity.max(1));

        Self {
            settings,
            store,
            source,
            shutdown: CancellationToken::new(),
            events_tx,
            events_rx: Some(events_rx),
            tasks: JoinSet::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Sender for Service notifications; intake closes on shutdown.
    pub fn notifier(&self) -> mpsc::Sender<ServiceEvent> {
        self.events_tx.clone()
    }

    pub fn snapshot_provider(&self) -> SnapshotProvider {
        SnapshotProvider::new(self.source.clone(), self.settings.scheme.clone())
    }

    /// Serve the embedded registry until shutdown.
    pub fn serve_registry(&mut self, listener: TcpListener, registry: Arc<RegistryStore>) {
        let state = RegistryState {
            store: registry,
            snapshots: self.snapshot_provider(),
            shutdown: self.shutdown.clone(),
        };
        let app = router(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());
        let token = self.shutdown.clone();

        self.tasks.spawn(async move {
            let addr = listener.local_addr().ok();
            info!(addr = ?addr, "Registry listening");

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Registry server failed");
            }
        });
    }

    /// Start the configured sync path. It consumes everything sent through
    /// `notifier`, so it must start before any notification source.
    pub fn start_sync(&mut self) -> Result<()> {
        let Some(events) = self.events_rx.take() else {
            bail!("sync path already started");
        };

        let path = SyncPath::new(
            self.settings.mode,
            self.source.clone(),
            self.store.clone(),
            self.settings.scheme.clone(),
            self.settings.workers,
        );
        let token = self.shutdown.clone();
        self.tasks.spawn(path.synchronize(events, token));
        Ok(())
    }

    /// Run a notification source (normally the Service watch).
    pub fn spawn_source<F, Fut>(&mut self, source: F)
    where
        F: FnOnce(mpsc::Sender<ServiceEvent>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = source(self.events_tx.clone(), self.shutdown.clone());
        self.tasks.spawn(fut);
    }

    /// Wait for `signal` (or a task ending on its own), then shut down.
    pub async fn run_until<S>(self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let Self {
            settings,
            store,
            shutdown,
            events_tx,
            mut tasks,
            ..
        } = self;

        tokio::select! {
            _ = signal => {}
            Some(ended) = tasks.join_next() => {
                if let Err(e) = ended {
                    error!(error = %e, "Federation task panicked");
                }
                warn!("Federation task exited early, shutting down");
            }
        }

        info!("Shutting down, no longer accepting Service notifications");
        shutdown.cancel();
        drop(events_tx);

        let drained = tokio::time::timeout(settings.drain_timeout, async {
            while let Some(ended) = tasks.join_next().await {
                if let Err(e) = ended {
                    error!(error = %e, "Federation task panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout = ?settings.drain_timeout,
                remaining = tasks.len(),
                "Drain timeout reached, proceeding with shutdown"
            );
        }

        if let Err(e) = store.close().await {
            error!(store = store.name(), error = %e, "Error occurred while closing the store");
        }
        info!("Federation sync stopped");
        Ok(())
    }
}

/// Build a Kubernetes client from a kubeconfig path or the ambient config.
async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {:?}", path))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?;
            Client::try_from(config).context("Failed to create K8s client")
        }
        None => Client::try_default()
            .await
            .context("Failed to create K8s client"),
    }
}

/// Start the agent and run until SIGINT/SIGTERM.
pub async fn start(config: FederationConfig) -> Result<()> {
    info!(
        domain = %config.scheme.domain(),
        mode = %config.sync_mode,
        workers = config.workers,
        "Starting Federation Sync"
    );

    // The store comes first so the sync path never forwards into nothing.
    let (store, embedded): (Arc<dyn ResourceStore>, Option<(Arc<RegistryStore>, TcpListener)>) =
        match &config.store_url {
            Some(url) => {
                let remote = HttpResourceStore::new(url, &config.tls)
                    .context("Error occurred while creating the registry client")?;
                remote
                    .ping()
                    .await
                    .with_context(|| format!("Remote registry {} is not reachable", url))?;
                (Arc::new(remote) as Arc<dyn ResourceStore>, None)
            }
            None => {
                let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind registry listener on {}", addr))?;
                let registry = Arc::new(RegistryStore::new());
                (registry.clone() as Arc<dyn ResourceStore>, Some((registry, listener)))
            }
        };

    let client = kube_client(config.kubeconfig.as_deref()).await?;
    let (watcher, cache) = ServiceWatcher::new(
        client,
        config.namespace.as_deref(),
        config.label_selector.as_deref(),
    );

    let mut supervisor = LifecycleSupervisor::new(SyncSettings::from(&config), store, Arc::new(cache));

    if let Some((registry, listener)) = embedded {
        supervisor.serve_registry(listener, registry);
    }
    supervisor.start_sync()?;
    supervisor.spawn_source(|events, shutdown| watcher.run(events, shutdown));

    supervisor.run_until(shutdown_signal()).await
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
