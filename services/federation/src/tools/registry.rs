//! Embedded Federated Registry
//!
//! In-process `ResourceStore` that also serves registry consumers. Every
//! mutation is broadcast; a consumer attaching to `/api/v1/watch` gets one
//! snapshot event followed by the live changes.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, put},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::service_sync::{FederatedResource, ResourceStore, SnapshotProvider};
use crate::error::StoreError;

/// Buffered changes per consumer before it is considered lagging
const CHANGE_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::Deleted => "deleted",
        }
    }
}

/// One registry mutation as pushed to consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryChange {
    pub action: ChangeAction,
    pub resource: FederatedResource,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Keyed-upsert registry held in memory.
pub struct RegistryStore {
    resources: RwLock<BTreeMap<String, FederatedResource>>,
    changes: broadcast::Sender<RegistryChange>,
    closed: AtomicBool,
}

impl RegistryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            resources: RwLock::new(BTreeMap::new()),
            changes,
            closed: AtomicBool::new(false),
        }
    }

    /// Receive every change made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    /// Current contents, ordered by id
    pub async fn resources(&self) -> Vec<FederatedResource> {
        self.resources.read().await.values().cloned().collect()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn publish(&self, action: ChangeAction, resource: FederatedResource) {
        // No receivers just means no consumer is attached.
        let _ = self.changes.send(RegistryChange {
            action,
            resource,
            at: chrono::Utc::now(),
        });
    }

    async fn upsert(&self, action: ChangeAction, resource: FederatedResource) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.resources
            .write()
            .await
            .insert(resource.id.clone(), resource.clone());
        self.publish(action, resource);
        Ok(())
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for RegistryStore {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn create(&self, resource: FederatedResource) -> Result<(), StoreError> {
        self.upsert(ChangeAction::Created, resource).await
    }

    async fn update(&self, resource: FederatedResource) -> Result<(), StoreError> {
        self.upsert(ChangeAction::Updated, resource).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let removed = self.resources.write().await.remove(id);
        match removed {
            Some(resource) => {
                self.publish(ChangeAction::Deleted, resource);
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        info!("Embedded registry closed");
        Ok(())
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

#[derive(Clone)]
pub struct RegistryState {
    pub store: Arc<RegistryStore>,
    pub snapshots: SnapshotProvider,
    /// Ends open watch streams on shutdown
    pub shutdown: CancellationToken,
}

/// JSON error body in the engine's `{status, message}` shape
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Rejected { .. } | StoreError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "status": "error",
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub fn router(state: RegistryState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/watch", get(watch))
        .route("/api/v1/resources", get(list_resources).post(create_resource))
        .route("/api/v1/resources/:id", put(update_resource).delete(delete_resource))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "federation-sync",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn snapshot(State(state): State<RegistryState>) -> Result<Json<Vec<FederatedResource>>, ApiError> {
    state
        .snapshots
        .snapshot()
        .await
        .map(Json)
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

async fn watch(
    State(state): State<RegistryState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before building the snapshot so no change falls in between.
    let changes = state.store.subscribe();
    let snapshot = state
        .snapshots
        .snapshot()
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let consumer = Uuid::new_v4();
    info!(%consumer, resources = snapshot.len(), "Registry consumer attached");

    let initial = Event::default()
        .event("snapshot")
        .json_data(&snapshot)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let updates = stream::unfold(changes, move |mut changes| async move {
        loop {
            match changes.recv().await {
                Ok(change) => match Event::default().event(change.action.as_str()).json_data(&change) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), changes)),
                    Err(e) => warn!(%consumer, error = %e, "Dropping unencodable registry change"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    // The consumer re-attaches and gets a fresh snapshot.
                    warn!(%consumer, skipped, "Registry consumer lagged, closing stream");
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let shutdown = state.shutdown.clone();
    let stream = stream::once(async move { Ok(initial) })
        .chain(updates)
        .take_until(async move { shutdown.cancelled().await });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn list_resources(State(state): State<RegistryState>) -> Json<Vec<FederatedResource>> {
    Json(state.store.resources().await)
}

async fn create_resource(
    State(state): State<RegistryState>,
    Json(resource): Json<FederatedResource>,
) -> Result<StatusCode, ApiError> {
    state.store.create(resource).await?;
    Ok(StatusCode::CREATED)
}

async fn update_resource(
    State(state): State<RegistryState>,
    Path(id): Path<String>,
    Json(resource): Json<FederatedResource>,
) -> Result<StatusCode, ApiError> {
    if resource.id != id {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("path id {} does not match body id {}", id, resource.id),
        ));
    }
    state.store.update(resource).await?;
    Ok(StatusCode::OK)
}

async fn delete_resource(
    State(state): State<RegistryState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
