//! k0ube: build a Rust project and run it on Kubernetes without a registry
//!
//! The binary travels through the `k0ube-stager` sidecar; the pod's setup
//! steps fetch it into a shared volume before the workload container starts.

pub mod builder;
pub mod commands;
pub mod config;
pub mod deployer;
pub mod error;
pub mod locator;
pub mod orchestrator;

pub use config::{DeploymentArgs, DeploymentConfig};
pub use deployer::Deployment;
pub use error::{DeployError, FailureKind};
pub use orchestrator::{Mode, auto_deploy, deploy_folder};
