//! Remote Registry Client
//!
//! `ResourceStore` backed by another federation registry's write API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Response, StatusCode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::agents::service_sync::{FederatedResource, ResourceStore};
use crate::error::StoreError;

/// TLS material for the registry connection
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub root_ca_certs: Vec<PathBuf>,
    pub peer_cert: Option<PathBuf>,
    pub peer_key: Option<PathBuf>,
}

pub struct HttpResourceStore {
    http_client: Client,
    base_url: String,
    closed: AtomicBool,
}

impl HttpResourceStore {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: &str, tls: &TlsMaterial) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));

        for path in &tls.root_ca_certs {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read root CA certificate {:?}", path))?;
            let cert = Certificate::from_pem(&pem)
                .with_context(|| format!("Invalid root CA certificate {:?}", path))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.peer_cert, &tls.peer_key) {
            let cert = std::fs::read(cert_path)
                .with_context(|| format!("Failed to read peer certificate {:?}", cert_path))?;
            let key = std::fs::read(key_path)
                .with_context(|| format!("Failed to read peer key {:?}", key_path))?;
            let identity = Identity::from_pkcs8_pem(&cert, &key).context("Invalid peer certificate or key")?;
            builder = builder.identity(identity);
        }

        let http_client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the registry answers its health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .http_client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await?;
        check(response, None).await?;
        info!(url = %self.base_url, "Remote registry reachable");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn resource_url(&self, id: &str) -> String {
        format!("{}/api/v1/resources/{}", self.base_url, id)
    }
}

/// Map a registry response to a store result. `not_found_id` turns a 404
/// into `StoreError::NotFound`.
async fn check(response: Response, not_found_id: Option<&str>) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        if let Some(id) = not_found_id {
            return Err(StoreError::NotFound(id.to_string()));
        }
    }

    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    fn name(&self) -> &str {
        "remote"
    }

    async fn create(&self, resource: FederatedResource) -> Result<(), StoreError> {
        self.ensure_open()?;
        debug!(id = %resource.id, "POST federated resource");

        let response = self
            .http_client
            .post(format!("{}/api/v1/resources", self.base_url))
            .json(&resource)
            .send()
            .await?;
        check(response, None).await
    }

    async fn update(&self, resource: FederatedResource) -> Result<(), StoreError> {
        self.ensure_open()?;
        debug!(id = %resource.id, "PUT federated resource");

        let response = self
            .http_client
            .put(self.resource_url(&resource.id))
            .json(&resource)
            .send()
            .await?;
        check(response, None).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        debug!(id = %id, "DELETE federated resource");

        let response = self.http_client.delete(self.resource_url(id)).send().await?;
        check(response, Some(id)).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        info!(url = %self.base_url, "Remote registry connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::service_sync::testing::InMemorySource;
    use crate::agents::service_sync::{IdentifierScheme, SnapshotProvider};
    use crate::tools::registry::{router, RegistryState, RegistryStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Serve an embedded registry on a loopback port.
    async fn serve_registry() -> (String, Arc<RegistryStore>) {
        let store = Arc::new(RegistryStore::new());
        let state = RegistryState {
            store: store.clone(),
            snapshots: SnapshotProvider::new(Arc::new(InMemorySource::default()), IdentifierScheme::default()),
            shutdown: CancellationToken::new(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        (format!("http://{}/", addr), store)
    }

    fn resource(name: &str) -> FederatedResource {
        FederatedResource {
            id: format!("{}.billing.federation.local", name),
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip_against_embedded_registry() {
        let (url, registry) = serve_registry().await;
        let client = HttpResourceStore::new(&url, &TlsMaterial::default()).unwrap();
        assert!(!client.base_url().ends_with('/'));

        client.ping().await.unwrap();
        client.create(resource("payments")).await.unwrap();
        client.update(resource("payments")).await.unwrap();
        assert_eq!(registry.resources().await, vec![resource("payments")]);

        client.delete("payments.billing.federation.local").await.unwrap();
        let err = client.delete("payments.billing.federation.local").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "payments.billing.federation.local"));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_calls() {
        let client = HttpResourceStore::new("http://127.0.0.1:1", &TlsMaterial::default()).unwrap();
        client.close().await.unwrap();

        let err = client.create(resource("payments")).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    /// Write a self-signed certificate and its PKCS#8 key into `dir`.
    fn write_peer_identity(dir: &std::path::Path) -> (PathBuf, PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("peer.pem");
        let key_path = dir.join("peer-key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_builds_with_root_ca_and_peer_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_peer_identity(dir.path());
        let tls = TlsMaterial {
            root_ca_certs: vec![cert.clone()],
            peer_cert: Some(cert),
            peer_key: Some(key),
        };

        let client = HttpResourceStore::new("https://registry.example/", &tls).unwrap();
        assert_eq!(client.base_url(), "https://registry.example");
    }

    #[test]
    fn test_garbage_peer_key_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = write_peer_identity(dir.path());
        let bad_key = dir.path().join("bad-key.pem");
        std::fs::write(&bad_key, "not a key").unwrap();
        let tls = TlsMaterial {
            root_ca_certs: Vec::new(),
            peer_cert: Some(cert),
            peer_key: Some(bad_key),
        };

        assert!(HttpResourceStore::new("https://registry.example", &tls).is_err());
    }

    #[test]
    fn test_missing_root_ca_fails_construction() {
        let tls = TlsMaterial {
            root_ca_certs: vec![PathBuf::from("/nonexistent/ca.pem")],
            ..Default::default()
        };

        assert!(HttpResourceStore::new("https://registry.example", &tls).is_err());
    }
}
