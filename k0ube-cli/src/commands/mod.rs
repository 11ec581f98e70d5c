//! `k0ube` subcommands

pub mod deploy;
pub mod locate;
pub mod render;
pub mod stage;

pub use deploy::{DeployArgs, handle_deploy_command};
pub use locate::handle_locate_command;
pub use render::{RenderArgs, handle_render_command};
pub use stage::{StageArgs, handle_stage_command};
