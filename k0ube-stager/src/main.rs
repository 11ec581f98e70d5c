//! k0ube-stager: file-hosting sidecar that workloads fetch their binary from

use anyhow::{Context, Result};
use clap::Parser;
use k0ube_stager::{StagerConfig, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StagerConfig::parse();

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("Failed to create stager root {}", config.root.display()))?;

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    info!(
        version = k0ube_c0re_lib::version::VERSION,
        root = %config.root.display(),
        listen = %config.listen,
        "🚚 k0ube-stager listening"
    );

    axum::serve(listener, router(&config))
        .await
        .context("Stager server failed")?;
    Ok(())
}
