//! Builder: compile a source folder into a single Linux executable
//!
//! Cargo runs with a cleared environment plus the toolchain variables
//! captured from the invoking shell. The executable is located from cargo's
//! JSON messages, never by guessing paths under `target/`.

use crate::error::{
    ArtifactAmbiguousSnafu, ArtifactCopySnafu, ArtifactMissingSnafu, BuildFailureSnafu,
    BuildSpawnSnafu, BuildWorkdirSnafu, Result,
};
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Variables passed through to cargo; everything else is dropped
pub const TOOLCHAIN_VARS: [&str; 5] = ["PATH", "HOME", "CARGO_HOME", "RUSTUP_HOME", "RUSTUP_TOOLCHAIN"];

pub const STATIC_TARGET: &str = "x86_64-unknown-linux-musl";
pub const DYNAMIC_TARGET: &str = "x86_64-unknown-linux-gnu";
pub const STATIC_RUSTFLAGS: &str = "-C target-feature=+crt-static -C strip=symbols";

/// Toolchain environment handed to cargo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainEnv {
    vars: BTreeMap<String, String>,
}

impl ToolchainEnv {
    /// Capture [`TOOLCHAIN_VARS`] from the current process
    pub fn capture() -> Self {
        let vars = TOOLCHAIN_VARS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// What to build and how
#[derive(Debug, Clone)]
pub struct BuildSpec {
    name: String,
    source: PathBuf,
    bin: Option<String>,
    static_build: bool,
    toolchain: ToolchainEnv,
}

impl BuildSpec {
    /// Build the package in `source`; the artifact is stored as `name`
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            bin: None,
            static_build: true,
            toolchain: ToolchainEnv::capture(),
        }
    }

    pub fn with_bin(mut self, bin: Option<String>) -> Self {
        self.bin = bin;
        self
    }

    pub fn with_static_build(mut self, static_build: bool) -> Self {
        self.static_build = static_build;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainEnv) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_triple(&self) -> &'static str {
        if self.static_build {
            STATIC_TARGET
        } else {
            DYNAMIC_TARGET
        }
    }

    /// Complete environment of the cargo process
    pub fn command_env(&self) -> BTreeMap<String, String> {
        let mut env = self.toolchain.vars().clone();
        if self.static_build {
            env.insert("RUSTFLAGS".to_string(), STATIC_RUSTFLAGS.to_string());
        }
        env
    }

    pub fn command_args(&self, target_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--release".to_string(),
            "--message-format=json-render-diagnostics".to_string(),
            "--manifest-path".to_string(),
            self.source.join("Cargo.toml").display().to_string(),
            "--target".to_string(),
            self.target_triple().to_string(),
            "--target-dir".to_string(),
            target_dir.display().to_string(),
        ];
        if let Some(bin) = &self.bin {
            args.push("--bin".to_string());
            args.push(bin.clone());
        }
        args
    }

    /// Run cargo and copy the executable into a fresh temporary directory
    pub fn build(&self) -> Result<Artifact> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", self.name))
            .tempdir()
            .context(BuildWorkdirSnafu { name: &self.name })?;
        let args = self.command_args(&dir.path().join("target"));
        debug!(name = %self.name, target = self.target_triple(), ?args, "running cargo");

        let output = duct::cmd("cargo", &args)
            .dir(&self.source)
            .full_env(self.command_env())
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .context(BuildSpawnSnafu { program: "cargo" })?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        ensure!(
            output.status.success(),
            BuildFailureSnafu {
                name: &self.name,
                output: diagnostics(&stdout),
            }
        );

        let built = find_executable(&stdout, &self.name, self.bin.as_deref())?;
        let artifact = Artifact::collect(dir, &built, &self.name)?;
        info!(name = %self.name, artifact = %artifact.path().display(), "build finished");
        Ok(artifact)
    }
}

/// A built binary. Dropping it removes the directory it lives in.
#[derive(Debug)]
pub struct Artifact {
    dir: TempDir,
    path: PathBuf,
}

impl Artifact {
    /// Copy `built` into `dir` as `name`; the stager stores it under that name
    pub(crate) fn collect(dir: TempDir, built: &Path, name: &str) -> Result<Self> {
        let path = dir.path().join(name);
        std::fs::copy(built, &path).context(ArtifactCopySnafu { from: built })?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    target: Option<CargoTarget>,
    #[serde(default)]
    executable: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CargoTarget {
    name: String,
}

/// Executable from cargo's `compiler-artifact` messages
///
/// With `bin` set, only that target counts. Without it, the package must
/// produce exactly one executable.
fn find_executable(output: &str, name: &str, bin: Option<&str>) -> Result<PathBuf> {
    let mut found: Vec<(String, PathBuf)> = output
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .filter(|msg| msg.reason == "compiler-artifact")
        .filter_map(|msg| Some((msg.target?.name, msg.executable?)))
        .filter(|(target, _)| bin.is_none_or(|bin| target == bin))
        .collect();
    found.dedup();

    match found.len() {
        0 => ArtifactMissingSnafu { name }.fail(),
        1 => Ok(found.remove(0).1),
        _ => ArtifactAmbiguousSnafu {
            name,
            candidates: found.into_iter().map(|(target, _)| target).collect::<Vec<_>>(),
        }
        .fail(),
    }
}

/// Human-readable part of cargo's output: everything that is not a JSON message
fn diagnostics(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with('{'))
        .collect::<Vec<_>>()
        .join("\n")
}
