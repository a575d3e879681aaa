//! In-memory collaborators for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::discovery::ServiceSource;
use super::store::ResourceStore;
use super::types::{FederatedResource, ServiceKey, ServiceRecord};
use crate::error::{SourceError, StoreError};

/// Cluster state held in a map; can be switched to unavailable.
#[derive(Default)]
pub struct InMemorySource {
    services: Mutex<BTreeMap<ServiceKey, ServiceRecord>>,
    unavailable: AtomicBool,
}

impl InMemorySource {
    pub fn with(records: Vec<ServiceRecord>) -> Self {
        let source = Self::default();
        for record in records {
            source.insert(record);
        }
        source
    }

    pub fn insert(&self, record: ServiceRecord) {
        self.services.lock().unwrap().insert(record.key(), record);
    }

    pub fn remove(&self, key: &ServiceKey) {
        self.services.lock().unwrap().remove(key);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SourceError::NotReady)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ServiceSource for InMemorySource {
    async fn get(&self, key: &ServiceKey) -> Result<Option<ServiceRecord>, SourceError> {
        self.check()?;
        Ok(self.services.lock().unwrap().get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, SourceError> {
        self.check()?;
        Ok(self.services.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(FederatedResource),
    Update(FederatedResource),
    Delete(String),
}

/// Keyed-upsert store that records every call it receives.
///
/// With a delay set, each call sleeps before taking effect, and calls that
/// overlap on the same id are counted.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    records: Mutex<BTreeMap<String, FederatedResource>>,
    failing: Mutex<HashSet<String>>,
    closed: AtomicBool,
    delay: Duration,
    in_flight: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
}

impl RecordingStore {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Calls that started while another call for the same id was running
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    async fn enter(&self, id: &str) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let running = in_flight.entry(id.to_string()).or_default();
            if *running > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *running += 1;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn leave(&self, id: &str) {
        if let Some(running) = self.in_flight.lock().unwrap().get_mut(id) {
            *running -= 1;
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn records(&self) -> BTreeMap<String, FederatedResource> {
        self.records.lock().unwrap().clone()
    }

    pub fn seed(&self, resource: FederatedResource) {
        self.records.lock().unwrap().insert(resource.id.clone(), resource);
    }

    /// Make every call touching `id` fail with a rejection.
    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn admit(&self, call: StoreCall, id: &str) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(id) {
            return Err(StoreError::Rejected {
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create(&self, resource: FederatedResource) -> Result<(), StoreError> {
        let id = resource.id.clone();
        self.enter(&id).await;
        let result = self.admit(StoreCall::Create(resource.clone()), &id).map(|()| {
            self.records.lock().unwrap().insert(id.clone(), resource);
        });
        self.leave(&id);
        result
    }

    async fn update(&self, resource: FederatedResource) -> Result<(), StoreError> {
        let id = resource.id.clone();
        self.enter(&id).await;
        let result = self.admit(StoreCall::Update(resource.clone()), &id).map(|()| {
            self.records.lock().unwrap().insert(id.clone(), resource);
        });
        self.leave(&id);
        result
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.enter(id).await;
        let result = self.admit(StoreCall::Delete(id.to_string()), id).and_then(|()| {
            match self.records.lock().unwrap().remove(id) {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound(id.to_string())),
            }
        });
        self.leave(id);
        result
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
