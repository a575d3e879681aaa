//! Process configuration
//!
//! Every flag can also be set through the environment.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::service_sync::{IdentifierScheme, SyncMode, DEFAULT_FEDERATION_DOMAIN};
use crate::error::ConfigError;
use crate::tools::TlsMaterial;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Federation Sync - Syncs K8s Services into the federated resource registry
#[derive(Parser, Debug)]
#[command(name = "federation-sync", version, about)]
pub struct FederationArgs {
    /// Domain appended to every federated id (name.namespace.<domain>)
    #[arg(long, default_value = DEFAULT_FEDERATION_DOMAIN, env = "FEDERATION_DOMAIN")]
    pub federation_domain: String,

    /// Sync path: reconcile (level-triggered), events (edge-triggered) or hybrid
    #[arg(long, value_enum, default_value_t = SyncMode::Reconcile, env = "SYNC_MODE")]
    pub sync_mode: SyncMode,

    /// Reconcile workers
    #[arg(long, default_value = "4", env = "SYNC_WORKERS")]
    pub workers: usize,

    /// Buffered Service notifications before the watch applies backpressure
    #[arg(long, default_value = "1024", env = "SYNC_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Seconds to wait for in-flight work on shutdown
    #[arg(long, default_value = "10", env = "DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: u64,

    /// Port for the embedded registry
    #[arg(long, default_value = "8080", env = "FEDERATION_PORT")]
    pub port: u16,

    /// Write to a remote registry instead of the embedded one
    #[arg(long, env = "FEDERATION_STORE_URL")]
    pub store_url: Option<String>,

    /// Root CA certificate(s) for the remote registry (PEM)
    #[arg(long = "root-ca-cert")]
    pub root_ca_certs: Vec<PathBuf>,

    /// Client certificate for the remote registry (PEM)
    #[arg(long, env = "FEDERATION_PEER_CERT")]
    pub peer_cert: Option<PathBuf>,

    /// Client key for the remote registry (PKCS#8 PEM)
    #[arg(long, env = "FEDERATION_PEER_KEY")]
    pub peer_key: Option<PathBuf>,

    /// Kubeconfig for running outside the cluster
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch Services in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Label selector for Services to federate (e.g., "lornu.ai/federate=true")
    #[arg(long, env = "SERVICE_LABEL_SELECTOR")]
    pub label_selector: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub scheme: IdentifierScheme,
    pub sync_mode: SyncMode,
    pub workers: usize,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
    pub port: u16,
    pub store_url: Option<String>,
    pub tls: TlsMaterial,
    pub kubeconfig: Option<PathBuf>,
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

impl FederationArgs {
    pub fn into_config(self) -> Result<FederationConfig, ConfigError> {
        let domain = self.federation_domain.trim().to_string();
        if domain.is_empty()
            || domain.starts_with('.')
            || domain.ends_with('.')
            || domain.contains("..")
            || domain.contains(char::is_whitespace)
        {
            return Err(ConfigError::InvalidDomain(self.federation_domain));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroValue("--workers"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("--queue-capacity"));
        }
        if self.peer_cert.is_some() != self.peer_key.is_some() {
            return Err(ConfigError::IncompletePeerIdentity);
        }
        if let Some(url) = &self.store_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidStoreUrl(url.clone()));
            }
        }

        Ok(FederationConfig {
            scheme: IdentifierScheme::new(domain),
            sync_mode: self.sync_mode,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            port: self.port,
            store_url: self.store_url,
            tls: TlsMaterial {
                root_ca_certs: self.root_ca_certs,
                peer_cert: self.peer_cert,
                peer_key: self.peer_key,
            },
            kubeconfig: self.kubeconfig,
            namespace: self.namespace,
            label_selector: self.label_selector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> FederationArgs {
        let mut argv = vec!["federation-sync"];
        argv.extend_from_slice(args);
        FederationArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).into_config().unwrap();

        assert_eq!(config.scheme.domain(), DEFAULT_FEDERATION_DOMAIN);
        assert_eq!(config.sync_mode, SyncMode::Reconcile);
        assert_eq!(config.workers, 4);
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.port, 8080);
        assert!(config.store_url.is_none());
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--federation-domain",
            "foo.com",
            "--sync-mode",
            "hybrid",
            "--workers",
            "8",
            "--store-url",
            "https://registry.example",
            "--root-ca-cert",
            "/etc/ca.pem",
            "--namespace",
            "billing",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.scheme.derive("payments", "billing"), "payments.billing.foo.com");
        assert_eq!(config.sync_mode, SyncMode::Hybrid);
        assert_eq!(config.workers, 8);
        assert_eq!(config.tls.root_ca_certs, vec![PathBuf::from("/etc/ca.pem")]);
        assert_eq!(config.namespace.as_deref(), Some("billing"));
    }

    #[test]
    fn test_rejects_bad_domain() {
        for domain in ["", ".foo.com", "foo.com.", "foo..com"] {
            let err = parse(&["--federation-domain", domain]).into_config().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDomain(_)), "{:?} accepted", domain);
        }
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = parse(&["--workers", "0"]).into_config().unwrap_err();
        assert_eq!(err, ConfigError::ZeroValue("--workers"));
    }

    #[test]
    fn test_rejects_half_peer_identity() {
        let err = parse(&["--peer-cert", "/etc/peer.pem"]).into_config().unwrap_err();
        assert_eq!(err, ConfigError::IncompletePeerIdentity);
    }

    #[test]
    fn test_rejects_non_http_store_url() {
        let err = parse(&["--store-url", "grpc://registry:443"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStoreUrl(_)));
    }
}
