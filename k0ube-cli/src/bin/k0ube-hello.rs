//! Demo workload: run with `--deploy` to ship itself to the cluster,
//! otherwise answer 200 on every path.

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use clap::Parser;
use k0ube_cli::{Mode, auto_deploy};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct HelloArgs {
    /// Port to serve on
    #[arg(long, default_value_t = 80)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    if auto_deploy(raw.clone()).await.context("Self-deployment failed")? == Mode::SelfDeploy {
        return Ok(());
    }

    let args = HelloArgs::parse_from(
        std::iter::once("k0ube-hello".to_string())
            .chain(k0ube_cli::orchestrator::split_args(&raw).forwarded),
    );

    let app = Router::new().fallback(|| async { StatusCode::OK });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("Failed to bind port {}", args.port))?;
    info!(port = args.port, "👋 k0ube-hello listening");
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
