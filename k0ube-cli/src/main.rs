use anyhow::Result;
use clap::{Parser, Subcommand};
use k0ube_cli::commands::{
    DeployArgs, RenderArgs, StageArgs, handle_deploy_command, handle_locate_command,
    handle_render_command, handle_stage_command,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "k0ube", version = k0ube_c0re_lib::version::VERSION)]
#[clap(about = "Build a Rust project and run it on Kubernetes without a container registry")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a folder and deploy it as a replica set with a service
    Deploy(DeployArgs),
    /// Upload a file to the stager
    Stage(StageArgs),
    /// Print the node address and stager URL
    Locate,
    /// Print the replica set and service as YAML without deploying
    Render(RenderArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Deploy(cmd) => handle_deploy_command(cmd).await,
        Commands::Stage(cmd) => handle_stage_command(cmd).await,
        Commands::Locate => handle_locate_command().await,
        Commands::Render(cmd) => handle_render_command(cmd),
    }
}
