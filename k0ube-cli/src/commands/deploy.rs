//! `k0ube deploy`: build a folder and run it in the cluster

use crate::config::{DeploymentArgs, DeploymentConfig};
use crate::orchestrator::{DeployRequest, deploy_folder, with_suffix, workload_name};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// Source folder holding Cargo.toml
    #[arg(long, default_value = ".")]
    pub folder: PathBuf,

    /// Workload name (default: folder name)
    #[arg(long)]
    pub name: Option<String>,

    /// Suffix appended to the workload name
    #[arg(long)]
    pub suffix: Option<String>,

    /// Cargo binary target, when the package has several
    #[arg(long)]
    pub bin: Option<String>,

    #[command(flatten)]
    pub deployment: DeploymentArgs,

    /// Arguments for the deployed program
    #[arg(last = true)]
    pub args: Vec<String>,
}

pub async fn handle_deploy_command(cmd: DeployArgs) -> Result<()> {
    let folder = std::fs::canonicalize(&cmd.folder)
        .with_context(|| format!("Source folder not found: {}", cmd.folder.display()))?;
    let name = match &cmd.name {
        Some(name) => with_suffix(name, cmd.suffix.as_deref()),
        None => workload_name(&folder, cmd.suffix.as_deref())?,
    };

    let request = DeployRequest {
        name,
        folder,
        bin: cmd.bin,
        config: DeploymentConfig::load(&cmd.deployment)?,
        args: cmd.args,
    };
    let report = deploy_folder(&request)
        .await
        .with_context(|| format!("Failed to deploy {}", request.name))?;

    println!("📍 {}/{} fetches {}", report.namespace, report.name, report.binary_url);
    if let Some(port) = report.node_port {
        println!("🌐 Reachable on node port {port}");
    }
    Ok(())
}
