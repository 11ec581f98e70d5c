//! Deployment configuration
//!
//! Flags win over `~/.k0ube/k0ube.toml`, which wins over the built-in
//! defaults. The result is a [`DeploymentConfig`] built once at startup and
//! passed explicitly to everything that needs it.

use crate::error::{
    ConfigFileParseSnafu, ConfigFileReadSnafu, InvalidConfigMapsSnafu, InvalidLabelsSnafu,
    InvalidQuantitySnafu, RequestAboveLimitSnafu, Result,
};
use crate::deployer::SetupEncoding;
use clap::{ArgAction, Args};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "~/.k0ube/k0ube.toml";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_BASE_IMAGE: &str = "alpine:3.4";
pub const DEFAULT_CPU: &str = "100m";
pub const DEFAULT_MEMORY: &str = "64M";

lazy_static! {
    static ref QUANTITY: Regex =
        Regex::new(r"^\+?(\d+(?:\.\d*)?|\.\d+)(Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E|[eE][+-]?\d+)?$")
            .expect("quantity regex is valid");
}

/// Deployment flags shared by `k0ube deploy`, `k0ube render` and `--deploy`
///
/// Every field is optional so an unset flag falls through to the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct DeploymentArgs {
    /// Number of replicas
    #[arg(long)]
    pub replicas: Option<u32>,

    /// The Kubernetes namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Max CPU, e.g. 100m
    #[arg(long = "cpu-limit")]
    pub cpu_limit: Option<String>,

    /// Min CPU, e.g. 100m
    #[arg(long = "cpu-request")]
    pub cpu_request: Option<String>,

    /// Max memory, e.g. 64M
    #[arg(long = "memory-limit")]
    pub memory_limit: Option<String>,

    /// Min memory, e.g. 64M
    #[arg(long = "memory-request")]
    pub memory_request: Option<String>,

    /// Base image to run the container
    #[arg(long = "base-image")]
    pub base_image: Option<String>,

    /// Extra pod labels (JSON object)
    #[arg(long)]
    pub labels: Option<String>,

    /// ConfigMap names to mount under /cfg (JSON array)
    #[arg(long = "configMaps")]
    pub config_maps: Option<String>,

    /// Build a static, stripped binary
    #[arg(long = "static-build", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub static_build: Option<bool>,

    /// Carry setup steps in the pod.beta init-containers annotation instead of initContainers
    #[arg(long = "legacy-init-annotation")]
    pub legacy_init_annotation: bool,
}

/// `[deployment]` table of `~/.k0ube/k0ube.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentDefaults {
    pub replicas: Option<u32>,
    pub namespace: Option<String>,
    pub cpu_limit: Option<String>,
    pub cpu_request: Option<String>,
    pub memory_limit: Option<String>,
    pub memory_request: Option<String>,
    pub base_image: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub config_maps: Option<Vec<String>>,
    pub static_build: Option<bool>,
    pub legacy_init_annotation: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    deployment: DeploymentDefaults,
}

impl DeploymentDefaults {
    /// Path of the defaults file, `K0UBE_CONFIG` overriding `~/.k0ube/k0ube.toml`
    pub fn default_path() -> PathBuf {
        let raw = std::env::var("K0UBE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        PathBuf::from(shellexpand::tilde(&raw).as_ref())
    }

    /// Load defaults from `path`; a missing file means no defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no k0ube config file");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context(ConfigFileReadSnafu { path })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).context(ConfigFileParseSnafu { path })?;
        Ok(file.deployment)
    }
}

/// A validated resource quantity, kept exactly as the user wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuantity {
    raw: String,
    nanos: i128,
}

impl ResourceQuantity {
    /// Parse a Kubernetes quantity such as `100m`, `64M` or `1.5Gi`.
    ///
    /// `field` only names the flag in the error.
    pub fn parse(field: &str, raw: &str) -> Result<Self> {
        let invalid = || InvalidQuantitySnafu { field, value: raw };
        let caps = QUANTITY.captures(raw.trim()).ok_or_else(|| invalid().build())?;
        let (exp10, pow1024) = match caps.get(2).map(|m| m.as_str()) {
            None => (0, 0),
            Some("n") => (-9, 0),
            Some("u") => (-6, 0),
            Some("m") => (-3, 0),
            Some("k") => (3, 0),
            Some("M") => (6, 0),
            Some("G") => (9, 0),
            Some("T") => (12, 0),
            Some("P") => (15, 0),
            Some("E") => (18, 0),
            Some("Ki") => (0, 1),
            Some("Mi") => (0, 2),
            Some("Gi") => (0, 3),
            Some("Ti") => (0, 4),
            Some("Pi") => (0, 5),
            Some("Ei") => (0, 6),
            Some(exp) => (exp[1..].parse().map_err(|_| invalid().build())?, 0),
        };
        let nanos = nano_units(&caps[1], exp10, pow1024).ok_or_else(|| invalid().build())?;
        Ok(Self {
            raw: raw.trim().to_string(),
            nanos,
        })
    }

    /// Exact value in billionths of the base unit (cores, bytes), rounded up
    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.raw.clone())
    }
}

/// `number * 10^exp10 * 1024^pow1024` in nano-units; `None` when it overflows
fn nano_units(number: &str, exp10: i32, pow1024: u32) -> Option<i128> {
    let (int, frac) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{int}{frac}");
    let mantissa: i128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
    let scaled = mantissa.checked_mul(1024i128.checked_pow(pow1024)?)?;

    let shift = i64::from(exp10) + 9 - i64::try_from(frac.len()).ok()?;
    if shift >= 0 {
        scaled.checked_mul(10i128.checked_pow(u32::try_from(shift).ok()?)?)
    } else {
        // Kubernetes rounds sub-nano precision up
        match 10i128.checked_pow(u32::try_from(-shift).ok()?) {
            Some(divisor) => Some(scaled.checked_add(divisor - 1)? / divisor),
            None => Some(i128::from(scaled > 0)),
        }
    }
}

/// Explicit deployment configuration, resolved once per invocation
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub namespace: String,
    pub replicas: u32,
    pub cpu_limit: ResourceQuantity,
    pub cpu_request: ResourceQuantity,
    pub memory_limit: ResourceQuantity,
    pub memory_request: ResourceQuantity,
    pub base_image: String,
    pub pod_labels: BTreeMap<String, String>,
    pub config_maps: Vec<String>,
    pub static_build: bool,
    pub setup_encoding: SetupEncoding,
}

impl DeploymentConfig {
    /// Flags over the default config file
    pub fn load(args: &DeploymentArgs) -> Result<Self> {
        let defaults = DeploymentDefaults::load(&DeploymentDefaults::default_path())?;
        Self::resolve(args, &defaults)
    }

    /// Flags over `defaults` over built-in values.
    ///
    /// JSON-encoded labels and config maps must parse; a malformed value is
    /// an error rather than an empty default.
    pub fn resolve(args: &DeploymentArgs, defaults: &DeploymentDefaults) -> Result<Self> {
        let pick = |flag: &Option<String>, file: &Option<String>, builtin: &str| {
            flag.clone()
                .or_else(|| file.clone())
                .unwrap_or_else(|| builtin.to_string())
        };

        let cpu_limit = ResourceQuantity::parse(
            "cpu-limit",
            &pick(&args.cpu_limit, &defaults.cpu_limit, DEFAULT_CPU),
        )?;
        let cpu_request = ResourceQuantity::parse(
            "cpu-request",
            &pick(&args.cpu_request, &defaults.cpu_request, DEFAULT_CPU),
        )?;
        let memory_limit = ResourceQuantity::parse(
            "memory-limit",
            &pick(&args.memory_limit, &defaults.memory_limit, DEFAULT_MEMORY),
        )?;
        let memory_request = ResourceQuantity::parse(
            "memory-request",
            &pick(&args.memory_request, &defaults.memory_request, DEFAULT_MEMORY),
        )?;
        check_request_within_limit("cpu", &cpu_request, &cpu_limit)?;
        check_request_within_limit("memory", &memory_request, &memory_limit)?;

        let pod_labels = match &args.labels {
            Some(raw) => parse_labels(raw)?,
            None => defaults.labels.clone().unwrap_or_default(),
        };
        let config_maps = match &args.config_maps {
            Some(raw) => parse_config_maps(raw)?,
            None => defaults.config_maps.clone().unwrap_or_default(),
        };

        let legacy = args.legacy_init_annotation || defaults.legacy_init_annotation.unwrap_or(false);

        Ok(Self {
            namespace: pick(&args.namespace, &defaults.namespace, DEFAULT_NAMESPACE),
            replicas: args.replicas.or(defaults.replicas).unwrap_or(1),
            cpu_limit,
            cpu_request,
            memory_limit,
            memory_request,
            base_image: pick(&args.base_image, &defaults.base_image, DEFAULT_BASE_IMAGE),
            pod_labels,
            config_maps,
            static_build: args.static_build.or(defaults.static_build).unwrap_or(true),
            setup_encoding: if legacy {
                SetupEncoding::Annotation
            } else {
                SetupEncoding::InitContainers
            },
        })
    }
}

fn check_request_within_limit(
    resource: &str,
    request: &ResourceQuantity,
    limit: &ResourceQuantity,
) -> Result<()> {
    ensure!(
        request.nanos() <= limit.nanos(),
        RequestAboveLimitSnafu {
            resource,
            request: request.as_str(),
            limit: limit.as_str(),
        }
    );
    Ok(())
}

/// Parse `--labels`, a JSON object of string values
pub fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw).context(InvalidLabelsSnafu { raw })
}

/// Parse `--configMaps`, a JSON array of names
pub fn parse_config_maps(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context(InvalidConfigMapsSnafu { raw })
}
