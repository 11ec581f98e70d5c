//! `k0ube render`: print the cluster objects a deploy would create

use crate::config::{DeploymentArgs, DeploymentConfig};
use crate::deployer::Deployment;
use anyhow::Result;
use clap::Args;
use k0ube_c0re_lib::protocol::{STAGER_SERVICE_NAME, artifact_url};

#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    /// Workload name
    #[arg(long)]
    pub name: String,

    /// URL the install step fetches from (default: the stager's in-cluster address)
    #[arg(long = "binary-url")]
    pub binary_url: Option<String>,

    #[command(flatten)]
    pub deployment: DeploymentArgs,

    /// Arguments for the deployed program
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Objects as YAML, without touching the cluster
pub fn render(cmd: &RenderArgs) -> Result<String> {
    let config = DeploymentConfig::load(&cmd.deployment)?;
    let binary_url = cmd.binary_url.clone().unwrap_or_else(|| {
        artifact_url(&format!("http://{STAGER_SERVICE_NAME}"), &cmd.name)
    });
    let deployment = Deployment::from_config(&cmd.name, &config)?
        .with_args(cmd.args.clone())
        .with_binary_url(binary_url);
    Ok(deployment.render()?)
}

pub fn handle_render_command(cmd: RenderArgs) -> Result<()> {
    print!("{}", render(&cmd)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_binary_url_is_in_cluster() {
        let cmd = RenderArgs {
            name: "svc".to_string(),
            binary_url: None,
            deployment: DeploymentArgs::default(),
            args: vec![],
        };
        let yaml = render(&cmd).unwrap();
        assert!(yaml.contains("http://k0ube-stager/svc"));
    }
}
