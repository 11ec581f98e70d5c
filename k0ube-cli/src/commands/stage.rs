//! `k0ube stage`: upload a file to the stager without deploying

use crate::locator::ClusterLocator;
use anyhow::{Context, Result};
use clap::Args;
use k0ube_c0re_lib::post_file;
use k0ube_c0re_lib::protocol::artifact_url;
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct StageArgs {
    /// File to upload; it is stored under its base name
    pub file: PathBuf,

    /// Stager base URL (default: discovered from the cluster)
    #[arg(long, env = "K0UBE_STAGER_URL")]
    pub url: Option<String>,
}

pub async fn handle_stage_command(cmd: StageArgs) -> Result<()> {
    let base_url = match cmd.url {
        Some(url) => url,
        None => ClusterLocator::connect()
            .await
            .context("Failed to connect to the cluster")?
            .staging_url()
            .await
            .context("Failed to locate the stager")?,
    };

    let name = cmd
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("No file name in {}", cmd.file.display()))?
        .to_string();

    post_file(&cmd.file, &base_url)
        .await
        .with_context(|| format!("Failed to upload {}", cmd.file.display()))?;
    println!("📦 {}", artifact_url(&base_url, &name));
    Ok(())
}
