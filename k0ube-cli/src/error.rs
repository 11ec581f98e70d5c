//! Error taxonomy for the deploy pipeline
//!
//! Every stage fails into one [`DeployError`]; [`DeployError::kind`] groups
//! the variants into the stage that produced them. Nothing here is retried
//! and nothing is rolled back.

use k0ube_c0re_lib::StagerError;
use kube::config::KubeconfigError;
use snafu::Snafu;
use std::path::PathBuf;

/// Which part of the pipeline an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The compiler could not produce a binary
    Build,
    /// The binary could not be handed to the stager
    Transfer,
    /// Cluster credentials or the stager address could not be resolved
    Discovery,
    /// The cluster refused (or we could not encode) a workload object
    Synthesis,
    /// Flags or configuration were rejected before anything ran
    Config,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Transfer => write!(f, "transfer"),
            Self::Discovery => write!(f, "discovery"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Config => write!(f, "config"),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeployError {
    // Build
    #[snafu(display("cannot create build directory for {name}"))]
    BuildWorkdir {
        name: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to launch {program}"))]
    BuildSpawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("build of {name} failed:\n{output}"))]
    BuildFailure { name: String, output: String },

    #[snafu(display("cargo produced no executable for {name}"))]
    ArtifactMissing { name: String },

    #[snafu(display(
        "cargo produced several executables for {name} ({}), pick one with --bin",
        candidates.join(", ")
    ))]
    ArtifactAmbiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[snafu(display("artifact path {} has no file name", path.display()))]
    ArtifactUnnamed { path: PathBuf },

    #[snafu(display("cannot copy {} into the artifact directory", from.display()))]
    ArtifactCopy {
        from: PathBuf,
        source: std::io::Error,
    },

    // Transfer
    #[snafu(display("transfer to stager failed"))]
    Transfer { source: StagerError },

    // Discovery
    #[snafu(display("cannot locate the home directory holding .kube/config"))]
    HomeDir,

    #[snafu(display("cannot read cluster credentials from {}", path.display()))]
    CredentialsRead {
        path: PathBuf,
        source: KubeconfigError,
    },

    #[snafu(display("cluster credentials in {} are unusable", path.display()))]
    CredentialsLoad {
        path: PathBuf,
        source: KubeconfigError,
    },

    #[snafu(display("cannot create cluster client"))]
    ClientCreate { source: kube::Error },

    #[snafu(display("cannot extract a node address from cluster host {host:?}"))]
    UnparsableHost { host: String },

    #[snafu(display("stager service {namespace}/{name} is not declared in the cluster"))]
    StagerServiceMissing {
        name: String,
        namespace: String,
        source: kube::Error,
    },

    #[snafu(display("stager service {name} is misconfigured: {reason}"))]
    StagerServiceMisconfigured { name: String, reason: String },

    // Synthesis
    #[snafu(display("cannot encode setup steps"))]
    SetupStepEncode { source: serde_json::Error },

    #[snafu(display("failed to create replica set {namespace}/{name}"))]
    WorkloadCreate {
        name: String,
        namespace: String,
        source: kube::Error,
    },

    #[snafu(display(
        "failed to create service {namespace}/{name} (replica set {name} was left in place)"
    ))]
    ServiceCreate {
        name: String,
        namespace: String,
        source: kube::Error,
    },

    #[snafu(display("cannot render cluster objects"))]
    Render { source: serde_yaml::Error },

    // Config
    #[snafu(display("invalid deployment flags"))]
    InvalidArgs { source: clap::Error },

    #[snafu(display("cannot determine the current working directory"))]
    CurrentDir { source: std::io::Error },

    #[snafu(display("cannot derive a workload name from {}", path.display()))]
    NoDirName { path: PathBuf },

    #[snafu(display("invalid name {name:?}: {reason}"))]
    InvalidName { name: String, reason: String },

    #[snafu(display("--labels must be a JSON object of strings, got {raw:?}"))]
    InvalidLabels {
        raw: String,
        source: serde_json::Error,
    },

    #[snafu(display("--configMaps must be a JSON array of strings, got {raw:?}"))]
    InvalidConfigMaps {
        raw: String,
        source: serde_json::Error,
    },

    #[snafu(display("invalid resource quantity for {field}: {value:?}"))]
    InvalidQuantity { field: String, value: String },

    #[snafu(display("{resource} request {request} is above its limit {limit}"))]
    RequestAboveLimit {
        resource: String,
        request: String,
        limit: String,
    },

    #[snafu(display("label {key:?} is managed by k0ube and cannot be set"))]
    ReservedLabel { key: String },

    #[snafu(display("replica count {replicas} is out of range"))]
    InvalidReplicas { replicas: u32 },

    #[snafu(display("cannot read config file {}", path.display()))]
    ConfigFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot parse config file {}", path.display()))]
    ConfigFileParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl DeployError {
    /// Stage this error belongs to
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::BuildWorkdir { .. }
            | Self::BuildSpawn { .. }
            | Self::BuildFailure { .. }
            | Self::ArtifactMissing { .. }
            | Self::ArtifactAmbiguous { .. }
            | Self::ArtifactUnnamed { .. }
            | Self::ArtifactCopy { .. } => FailureKind::Build,
            Self::Transfer { .. } => FailureKind::Transfer,
            Self::HomeDir
            | Self::CredentialsRead { .. }
            | Self::CredentialsLoad { .. }
            | Self::ClientCreate { .. }
            | Self::UnparsableHost { .. }
            | Self::StagerServiceMissing { .. }
            | Self::StagerServiceMisconfigured { .. } => FailureKind::Discovery,
            Self::SetupStepEncode { .. }
            | Self::WorkloadCreate { .. }
            | Self::ServiceCreate { .. }
            | Self::Render { .. } => FailureKind::Synthesis,
            Self::InvalidArgs { .. }
            | Self::CurrentDir { .. }
            | Self::NoDirName { .. }
            | Self::InvalidName { .. }
            | Self::InvalidLabels { .. }
            | Self::InvalidConfigMaps { .. }
            | Self::InvalidQuantity { .. }
            | Self::RequestAboveLimit { .. }
            | Self::ReservedLabel { .. }
            | Self::InvalidReplicas { .. }
            | Self::ConfigFileRead { .. }
            | Self::ConfigFileParse { .. } => FailureKind::Config,
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
