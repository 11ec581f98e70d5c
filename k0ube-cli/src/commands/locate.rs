//! `k0ube locate`: show where binaries are staged

use crate::locator::ClusterLocator;
use anyhow::{Context, Result};

pub async fn handle_locate_command() -> Result<()> {
    let locator = ClusterLocator::connect()
        .await
        .context("Failed to connect to the cluster")?;
    let url = locator
        .staging_url()
        .await
        .context("Failed to locate the stager")?;

    println!("🖥️  Node: {}", locator.node());
    println!("📦 Stager: {url}");
    Ok(())
}
