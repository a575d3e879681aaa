//! Kubernetes Service Discovery
//!
//! Watches `Service` objects, keeps a reflector cache of them and turns raw
//! watch events into typed Add/Update/Delete notifications.

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{ServiceEvent, ServiceKey, ServiceRecord};
use crate::error::SourceError;

/// Read access to current cluster state.
#[async_trait]
pub trait ServiceSource: Send + Sync {
    /// Current record for `key`, or `None` if the Service does not exist.
    async fn get(&self, key: &ServiceKey) -> Result<Option<ServiceRecord>, SourceError>;

    /// Every Service currently known. Never a partial list.
    async fn list(&self) -> Result<Vec<ServiceRecord>, SourceError>;
}

/// Lifecycle of the reflector cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Syncing,
    Ready,
    Stopped,
}

/// Convert a Service into a record. Objects without name or namespace are skipped.
pub fn service_record(service: &Service) -> Option<ServiceRecord> {
    let name = service.metadata.name.clone()?;
    let namespace = service.namespace()?;

    Some(ServiceRecord {
        name,
        namespace,
        labels: service.labels().clone(),
        annotations: service.annotations().clone(),
    })
}

/// Diff a full relist against what was cached before it.
pub fn relist_events(previous: Vec<ServiceRecord>, current: Vec<ServiceRecord>) -> Vec<ServiceEvent> {
    let mut previous: BTreeMap<ServiceKey, ServiceRecord> =
        previous.into_iter().map(|r| (r.key(), r)).collect();

    let mut events = Vec::with_capacity(current.len());
    for record in current {
        match previous.remove(&record.key()) {
            Some(old) => events.push(ServiceEvent::Updated { old, new: record }),
            None => events.push(ServiceEvent::Added(record)),
        }
    }
    events.extend(previous.into_values().map(ServiceEvent::Deleted));
    events
}

/// Translate a watch event using the cache state from before it is applied.
pub fn translate_event(cache: &Store<Service>, event: &watcher::Event<Service>) -> Vec<ServiceEvent> {
    match event {
        watcher::Event::Applied(service) => {
            let Some(record) = service_record(service) else {
                return Vec::new();
            };
            let previous = cache
                .get(&ObjectRef::from_obj(service))
                .and_then(|old| service_record(&old));

            match previous {
                Some(old) => vec![ServiceEvent::Updated { old, new: record }],
                None => vec![ServiceEvent::Added(record)],
            }
        }
        watcher::Event::Deleted(service) => service_record(service)
            .map(ServiceEvent::Deleted)
            .into_iter()
            .collect(),
        watcher::Event::Restarted(services) => {
            let previous = cache.state().iter().filter_map(|s| service_record(s)).collect();
            let current = services.iter().filter_map(service_record).collect();
            relist_events(previous, current)
        }
    }
}

/// Reflector-backed view of Services, fed by `ServiceWatcher`.
#[derive(Clone)]
pub struct ServiceCache {
    store: Store<Service>,
    state: watch::Receiver<CacheState>,
}

impl ServiceCache {
    pub fn new(store: Store<Service>, state: watch::Receiver<CacheState>) -> Self {
        Self { store, state }
    }

    pub fn state(&self) -> CacheState {
        *self.state.borrow()
    }

    fn ensure_ready(&self) -> Result<(), SourceError> {
        match self.state() {
            CacheState::Ready => Ok(()),
            CacheState::Syncing => Err(SourceError::NotReady),
            CacheState::Stopped => Err(SourceError::Stopped),
        }
    }
}

#[async_trait]
impl ServiceSource for ServiceCache {
    async fn get(&self, key: &ServiceKey) -> Result<Option<ServiceRecord>, SourceError> {
        self.ensure_ready()?;

        let reference = ObjectRef::<Service>::new(&key.name).within(&key.namespace);
        Ok(self.store.get(&reference).and_then(|s| service_record(&s)))
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, SourceError> {
        self.ensure_ready()?;

        let mut records: Vec<ServiceRecord> = self
            .store
            .state()
            .iter()
            .filter_map(|s| service_record(s))
            .collect();
        records.sort_by_key(|r| r.key());
        Ok(records)
    }
}

/// Watches Services and publishes notifications after updating the cache.
pub struct ServiceWatcher {
    api: Api<Service>,
    config: watcher::Config,
    writer: Writer<Service>,
    reader: Store<Service>,
    state: watch::Sender<CacheState>,
}

impl ServiceWatcher {
    /// Build a watcher over one namespace (or all) and the cache it feeds.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> (Self, ServiceCache) {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };

        let mut config = watcher::Config::default();
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }

        let writer = Writer::default();
        let reader = writer.as_reader();
        let (state, state_rx) = watch::channel(CacheState::Syncing);
        let cache = ServiceCache::new(reader.clone(), state_rx);

        (
            Self {
                api,
                config,
                writer,
                reader,
                state,
            },
            cache,
        )
    }

    /// Run until shutdown or until nobody is listening for notifications.
    ///
    /// The cache is updated before notifications for an event are sent, so a
    /// reconcile triggered by a notification always reads the newer state.
    pub async fn run(mut self, events: mpsc::Sender<ServiceEvent>, shutdown: CancellationToken) {
        info!("Starting Service watch");

        let stream = watcher(self.api.clone(), self.config.clone()).default_backoff();
        let mut stream = std::pin::pin!(stream);

        'watch: loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(error = %e, "Service watch failed, backing off");
                    continue;
                }
                None => break,
            };

            let notifications = translate_event(&self.reader, &event);
            let relisted = matches!(event, watcher::Event::Restarted(_));
            self.writer.apply_watcher_event(&event);

            if relisted && self.state.send_replace(CacheState::Ready) != CacheState::Ready {
                info!(services = self.reader.state().len(), "Service cache synced");
            }

            for notification in notifications {
                debug!(service = %notification.key(), kind = notification.kind(), "Service changed");
                if events.send(notification).await.is_err() {
                    info!("Notification consumer closed, stopping Service watch");
                    break 'watch;
                }
            }
        }

        self.state.send_replace(CacheState::Stopped);
        info!("Service watch stopped");
    }
}
