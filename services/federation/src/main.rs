//! Federation Sync - Standalone Binary
//!
//! Watches Kubernetes Services and keeps the federated resource registry in step.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lornu_federation::{agents::lifecycle, FederationArgs, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let args = FederationArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let config = args.into_config()?;
    lifecycle::start(config).await
}
