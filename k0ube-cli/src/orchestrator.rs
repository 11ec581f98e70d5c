//! Orchestrator: the build → locate → upload → create pipeline
//!
//! A program opts into self-deployment by calling [`auto_deploy`] first
//! thing in `main`. Without `--deploy` it returns [`Mode::Normal`] and the
//! program carries on. With it, the program rebuilds itself from the working
//! directory, ships the binary to the cluster and returns
//! [`Mode::SelfDeploy`]; the caller is expected to exit.

use crate::builder::{Artifact, BuildSpec};
use crate::config::{DeploymentArgs, DeploymentConfig};
use crate::deployer::Deployment;
use crate::error::{
    ArtifactUnnamedSnafu, CurrentDirSnafu, InvalidArgsSnafu, NoDirNameSnafu, Result, TransferSnafu,
};
use crate::locator::ClusterLocator;
use clap::{ArgAction, Parser};
use k0ube_c0re_lib::post_file;
use k0ube_c0re_lib::protocol::artifact_url;
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Deployer flags that take a value
pub const VALUE_FLAGS: [&str; 10] = [
    "deploySuffix",
    "replicas",
    "namespace",
    "cpu-limit",
    "cpu-request",
    "memory-limit",
    "memory-request",
    "base-image",
    "labels",
    "configMaps",
];

/// Deployer flags that are switches; they only take a value as `--flag=value`
pub const SWITCH_FLAGS: [&str; 3] = ["deploy", "static-build", "legacy-init-annotation"];

/// What the process should do after [`auto_deploy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the program as usual
    Normal,
    /// The program was deployed; exit without running it
    SelfDeploy,
}

impl Mode {
    /// Decide the mode from the process arguments (program name excluded)
    pub fn from_args(raw: &[String]) -> Self {
        let requested = split_args(raw)
            .deployer
            .iter()
            .filter_map(|arg| arg.strip_prefix("--deploy"))
            .filter(|rest| rest.is_empty() || rest.starts_with('='))
            .last()
            .is_some_and(|rest| rest.is_empty() || rest == "=true");
        if requested { Self::SelfDeploy } else { Self::Normal }
    }
}

/// Process arguments divided between the deployer and the deployed program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitArgs {
    /// Deployer flags, normalised to `--name[=value]`
    pub deployer: Vec<String>,
    /// Everything else, in order, passed to the container verbatim
    pub forwarded: Vec<String>,
}

fn flag_name(arg: &str) -> Option<&str> {
    let name = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    (!name.is_empty() && !name.starts_with('-')).then_some(name)
}

/// Separate deployer flags from the program's own arguments.
///
/// Deployer flags are accepted with one or two dashes and their value either
/// inline (`--replicas=3`) or as the next argument, unless that argument is
/// itself a flag. Scanning stops at `--`; whatever follows it is forwarded
/// untouched.
pub fn split_args(raw: &[String]) -> SplitArgs {
    let mut split = SplitArgs::default();
    let mut args = raw.iter().peekable();

    while let Some(arg) = args.next() {
        if arg == "--" {
            split.forwarded.extend(args.cloned());
            break;
        }
        let Some(flag) = flag_name(arg) else {
            split.forwarded.push(arg.clone());
            continue;
        };
        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        };

        if SWITCH_FLAGS.contains(&name) {
            split.deployer.push(match value {
                Some(value) => format!("--{name}={value}"),
                None => format!("--{name}"),
            });
        } else if VALUE_FLAGS.contains(&name) {
            let separate = || args.next_if(|next| flag_name(next).is_none()).cloned();
            match value.map(str::to_string).or_else(separate) {
                Some(value) => split.deployer.push(format!("--{name}={value}")),
                None => split.deployer.push(format!("--{name}")),
            }
        } else {
            split.forwarded.push(arg.clone());
        }
    }
    split
}

/// Deployer flags understood by a self-deploying program
#[derive(Debug, Clone, Parser)]
#[command(no_binary_name = true)]
pub struct SelfDeployArgs {
    /// Deploy to the current cluster instead of running
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value = "false", default_missing_value = "true")]
    pub deploy: bool,

    /// Suffix appended to the workload name
    #[arg(long = "deploySuffix")]
    pub deploy_suffix: Option<String>,

    #[command(flatten)]
    pub deployment: DeploymentArgs,
}

/// Append `suffix`, adding a `-` unless it starts with one, and lowercase
pub fn with_suffix(base: &str, suffix: Option<&str>) -> String {
    let name = match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) if suffix.starts_with('-') => format!("{base}{suffix}"),
        Some(suffix) => format!("{base}-{suffix}"),
        None => base.to_string(),
    };
    name.to_lowercase()
}

/// Workload name for a source folder: its basename plus the suffix
pub fn workload_name(dir: &Path, suffix: Option<&str>) -> Result<String> {
    let base = dir
        .file_name()
        .and_then(|name| name.to_str())
        .context(NoDirNameSnafu { path: dir })?;
    Ok(with_suffix(base, suffix))
}

/// Cargo `--bin` target of the running executable
fn current_bin() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_stem()?.to_str().map(str::to_string)
}

/// Where the install step fetches `artifact` once it is staged at `staging_url`
pub fn staged_binary_url(staging_url: &str, artifact: &Artifact) -> Result<String> {
    let path = artifact.path();
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context(ArtifactUnnamedSnafu { path })?;
    Ok(artifact_url(staging_url, name))
}

/// Everything needed to deploy one source folder
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub name: String,
    pub folder: PathBuf,
    /// Cargo binary target, required when the package has several
    pub bin: Option<String>,
    pub config: DeploymentConfig,
    /// Arguments for the deployed program
    pub args: Vec<String>,
}

/// What was created in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub name: String,
    pub namespace: String,
    pub binary_url: String,
    pub node_port: Option<i32>,
}

/// Self-deploy when `--deploy` is among `raw` (program name excluded).
///
/// Returns the mode so the caller decides whether to exit. Errors are not
/// retried and leave already created objects in place.
pub async fn auto_deploy<I, S>(raw: I) -> Result<Mode>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let raw: Vec<String> = raw.into_iter().map(Into::into).collect();
    if Mode::from_args(&raw) == Mode::Normal {
        return Ok(Mode::Normal);
    }

    let split = split_args(&raw);
    let flags = SelfDeployArgs::try_parse_from(&split.deployer).context(InvalidArgsSnafu)?;
    println!("🚢 Deployment mode");

    let folder = std::env::current_dir().context(CurrentDirSnafu)?;
    let request = DeployRequest {
        name: workload_name(&folder, flags.deploy_suffix.as_deref())?,
        folder,
        bin: current_bin(),
        config: DeploymentConfig::load(&flags.deployment)?,
        args: split.forwarded,
    };
    deploy_folder(&request).await?;
    Ok(Mode::SelfDeploy)
}

/// Build `request.folder` and run it in the cluster as `request.name`
pub async fn deploy_folder(request: &DeployRequest) -> Result<DeployReport> {
    let deployment =
        Deployment::from_config(&request.name, &request.config)?.with_args(request.args.clone());

    println!("🔨 Building {}", request.name);
    let artifact = BuildSpec::new(&request.name, &request.folder)
        .with_bin(request.bin.clone())
        .with_static_build(request.config.static_build)
        .build()?;

    println!("🔍 Locating cluster");
    let locator = ClusterLocator::connect().await?;
    let staging_url = locator.staging_url().await?;
    debug!(node = locator.node(), %staging_url, "cluster located");

    println!("📦 Uploading to {staging_url}");
    post_file(artifact.path(), &staging_url)
        .await
        .context(TransferSnafu)?;
    let binary_url = staged_binary_url(&staging_url, &artifact)?;

    println!("🚀 Deploying {}/{}", request.config.namespace, request.name);
    let deployment = deployment.with_binary_url(&binary_url);
    deployment.create(locator.client()).await?;
    let service = deployment.expose_service(locator.client()).await?;

    let node_port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|port| port.node_port);
    info!(name = %request.name, %binary_url, ?node_port, "deployment submitted");
    println!("✅ Deployment submitted");

    Ok(DeployReport {
        name: request.name.clone(),
        namespace: request.config.namespace.clone(),
        binary_url,
        node_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_deploy_flags_are_not_forwarded() {
        let split = split_args(&args(&["--deploy", "--port=8080", "--deploySuffix=x"]));
        assert_eq!(split.forwarded, vec!["--port=8080"]);
        assert_eq!(split.deployer, vec!["--deploy", "--deploySuffix=x"]);
    }

    #[test]
    fn test_single_dash_and_separate_values() {
        let split = split_args(&args(&[
            "-deploy",
            "-replicas",
            "3",
            "serve",
            "--namespace",
            "staging",
            "-v",
        ]));
        assert_eq!(split.deployer, vec!["--deploy", "--replicas=3", "--namespace=staging"]);
        assert_eq!(split.forwarded, vec!["serve", "-v"]);
    }

    #[test]
    fn test_value_flag_does_not_swallow_next_flag() {
        let split = split_args(&args(&["--deploy", "--deploySuffix", "--port=8080"]));
        assert_eq!(split.deployer, vec!["--deploy", "--deploySuffix"]);
        assert_eq!(split.forwarded, vec!["--port=8080"]);

        let split = split_args(&args(&["--namespace", "-v", "--replicas", "2"]));
        assert_eq!(split.deployer, vec!["--namespace", "--replicas=2"]);
        assert_eq!(split.forwarded, vec!["-v"]);
    }

    #[test]
    fn test_double_dash_stops_scanning() {
        let split = split_args(&args(&["--deploy", "--", "--replicas=2", "x"]));
        assert_eq!(split.deployer, vec!["--deploy"]);
        assert_eq!(split.forwarded, vec!["--replicas=2", "x"]);
    }

    #[test]
    fn test_switch_does_not_consume_next() {
        let split = split_args(&args(&["--static-build", "false", "--legacy-init-annotation"]));
        assert_eq!(
            split.deployer,
            vec!["--static-build", "--legacy-init-annotation"]
        );
        assert_eq!(split.forwarded, vec!["false"]);
    }

    #[test]
    fn test_json_values_survive() {
        let split = split_args(&args(&["--labels", r#"{"team":"x"}"#, "--configMaps=[\"a\"]"]));
        assert_eq!(
            split.deployer,
            vec![r#"--labels={"team":"x"}"#, r#"--configMaps=["a"]"#]
        );
        assert!(split.forwarded.is_empty());
    }

    #[test]
    fn test_mode_detection() {
        assert_eq!(Mode::from_args(&args(&[])), Mode::Normal);
        assert_eq!(Mode::from_args(&args(&["--port=80"])), Mode::Normal);
        assert_eq!(Mode::from_args(&args(&["--deploy"])), Mode::SelfDeploy);
        assert_eq!(Mode::from_args(&args(&["-deploy=true"])), Mode::SelfDeploy);
        assert_eq!(Mode::from_args(&args(&["--deploy=false"])), Mode::Normal);
        assert_eq!(Mode::from_args(&args(&["--deploySuffix=x"])), Mode::Normal);
        assert_eq!(Mode::from_args(&args(&["--", "--deploy"])), Mode::Normal);
    }

    #[test]
    fn test_self_deploy_args_parse() {
        let split = split_args(&args(&[
            "--deploy",
            "--deploySuffix",
            "v2",
            "--replicas=3",
            "--static-build=false",
            "--port=8080",
        ]));
        let flags = SelfDeployArgs::try_parse_from(&split.deployer).unwrap();
        assert!(flags.deploy);
        assert_eq!(flags.deploy_suffix.as_deref(), Some("v2"));
        assert_eq!(flags.deployment.replicas, Some(3));
        assert_eq!(flags.deployment.static_build, Some(false));
    }

    #[test]
    fn test_workload_name_suffix() {
        assert_eq!(
            workload_name(Path::new("/src/worker"), Some("-v2")).unwrap(),
            "worker-v2"
        );
        assert_eq!(
            workload_name(Path::new("/src/worker"), Some("v2")).unwrap(),
            "worker-v2"
        );
        assert_eq!(workload_name(Path::new("/src/Worker"), None).unwrap(), "worker");
        assert_eq!(workload_name(Path::new("/src/worker"), Some("")).unwrap(), "worker");
    }

    #[test]
    fn test_workload_name_needs_basename() {
        let err = workload_name(Path::new("/"), None).unwrap_err();
        assert!(matches!(err, DeployError::NoDirName { .. }));
    }

    #[test]
    fn test_install_step_fetches_the_uploaded_file() {
        let request = DeployRequest {
            name: "svc".to_string(),
            folder: PathBuf::from("/src/svc"),
            bin: None,
            config: DeploymentConfig::resolve(
                &DeploymentArgs::default(),
                &crate::config::DeploymentDefaults::default(),
            )
            .unwrap(),
            args: vec![],
        };
        let out = tempfile::tempdir().unwrap();
        let built = out.path().join("svc-bin");
        std::fs::write(&built, b"binary").unwrap();
        let artifact =
            Artifact::collect(tempfile::tempdir().unwrap(), &built, &request.name).unwrap();

        let url = staged_binary_url("http://host:30000/", &artifact).unwrap();
        assert_eq!(url, "http://host:30000/svc");
        let uploaded = artifact.path().file_name().unwrap().to_str().unwrap();
        assert!(url.ends_with(&format!("/{uploaded}")));

        let rs = Deployment::from_config(&request.name, &request.config)
            .unwrap()
            .with_binary_url(url.clone())
            .replica_set()
            .unwrap();
        let init = rs.spec.unwrap().template.unwrap().spec.unwrap().init_containers.unwrap();
        assert_eq!(init[0].command.as_ref().unwrap().last(), Some(&url));
    }

    #[tokio::test]
    async fn test_auto_deploy_without_flag_is_normal() {
        let mode = auto_deploy(["--port=8080", "serve"]).await.unwrap();
        assert_eq!(mode, Mode::Normal);
    }

    #[tokio::test]
    async fn test_auto_deploy_rejects_bad_flags() {
        let err = auto_deploy(["--deploy", "--replicas=lots"]).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn test_auto_deploy_rejects_bad_labels_before_building() {
        let err = auto_deploy(["--deploy", "--labels={team}"]).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidLabels { .. }));
    }
}
