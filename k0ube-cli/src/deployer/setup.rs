//! Setup steps that put the binary in place before the main container starts
//!
//! `install` downloads the binary from the stager into the shared `bin`
//! volume, `configure` marks it executable. They run in that order, both
//! before the workload container.

use crate::error::{Result, SetupStepEncodeSnafu};
use k8s_openapi::api::core::v1::{Container, VolumeMount};
use snafu::ResultExt;

/// Where the shared volume is mounted in every container
pub const INSTALL_DIR: &str = "/opt/bin";
/// Name of the shared emptyDir volume
pub const BIN_VOLUME: &str = "bin";
/// Image the setup steps run in; it needs `wget` and `chmod`
pub const SETUP_IMAGE: &str = "alpine:3.4";
/// Annotation carrying setup steps for clusters without native init containers
pub const INIT_CONTAINERS_ANNOTATION: &str = "pod.beta.kubernetes.io/init-containers";

/// How setup steps are attached to the pod template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupEncoding {
    /// `spec.initContainers`
    #[default]
    InitContainers,
    /// JSON array in [`INIT_CONTAINERS_ANNOTATION`]
    Annotation,
}

/// Absolute path of the installed binary
pub fn binary_path(name: &str) -> String {
    format!("{INSTALL_DIR}/{name}")
}

pub fn bin_mount() -> VolumeMount {
    VolumeMount {
        name: BIN_VOLUME.to_string(),
        mount_path: INSTALL_DIR.to_string(),
        ..Default::default()
    }
}

fn step(name: &str, command: Vec<String>) -> Container {
    Container {
        name: name.to_string(),
        image: Some(SETUP_IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(command),
        volume_mounts: Some(vec![bin_mount()]),
        ..Default::default()
    }
}

/// `install` then `configure`, in execution order
pub fn setup_steps(name: &str, binary_url: &str) -> Vec<Container> {
    let path = binary_path(name);
    vec![
        step(
            "install",
            vec![
                "wget".to_string(),
                "-O".to_string(),
                path.clone(),
                binary_url.to_string(),
            ],
        ),
        step("configure", vec!["chmod".to_string(), "+x".to_string(), path]),
    ]
}

/// Setup steps as the JSON array the legacy annotation expects
pub fn annotation_value(steps: &[Container]) -> Result<String> {
    serde_json::to_string_pretty(steps).context(SetupStepEncodeSnafu)
}
