//! Container runner abstraction
//!
//! Tasks describe one container invocation (image, entrypoint, commands,
//! environment, working directory) and delegate execution through the
//! [`CommandRunner`] trait. The default implementation shells out to the
//! docker CLI; tests substitute a mock.
//!
//! A non-zero exit code from the containerized tool is returned as data in
//! [`RunOutput`], never as an error — errors mean the container could not be
//! run at all.

use crate::errors::{Result, RunnerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Published CloudQuery container image used when the caller supplies none
pub const DEFAULT_IMAGE: &str = "ghcr.io/cloudquery/cloudquery:latest";

/// Path of the CloudQuery binary inside the default image
pub const CLOUDQUERY_BINARY: &str = "/app/cloudquery";

/// Container path the run workspace is mounted at
pub const CONTAINER_WORKDIR: &str = "/workdir";

/// Image pull policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Always,
    Missing,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Missing => "missing",
            Self::Never => "never",
        }
    }
}

/// Container options supplied by the caller, with defaults injected before use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Container image reference
    pub image: Option<String>,
    /// Entrypoint override; `[""]` clears the image's built-in entrypoint
    pub entrypoint: Option<Vec<String>>,
    /// Docker network mode (e.g. `host`)
    pub network_mode: Option<String>,
    /// Image pull policy
    pub pull: Option<PullPolicy>,
}

impl ContainerOptions {
    /// Inject the fixed image and pull-policy defaults where absent
    pub fn with_defaults(mut self) -> Self {
        if self.image.is_none() {
            self.image = Some(DEFAULT_IMAGE.to_string());
        }
        if self.pull.is_none() {
            self.pull = Some(PullPolicy::Always);
        }
        self
    }

    /// Ensure the empty-string entrypoint sentinel is set.
    ///
    /// Shell-wrapped command lists must not run through the image's built-in
    /// entrypoint, so an unset or empty entrypoint becomes `[""]`.
    pub fn with_shell_entrypoint(mut self) -> Self {
        let needs_override = self
            .entrypoint
            .as_ref()
            .map(|e| e.is_empty())
            .unwrap_or(true);
        if needs_override {
            self.entrypoint = Some(vec![String::new()]);
        }
        self
    }
}

/// One container invocation
#[derive(Debug, Clone)]
pub struct ContainerInvocation {
    pub options: ContainerOptions,
    /// Argument list handed to the container (after any entrypoint)
    pub commands: Vec<String>,
    /// Extra environment variables for the tool process
    pub env: HashMap<String, String>,
    /// Host directory mounted at [`CONTAINER_WORKDIR`]
    pub work_dir: PathBuf,
    /// Workspace-relative files to collect after the run
    pub output_files: Vec<String>,
}

/// Result of a completed container run
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code reported by the tool; non-zero is data, not an error
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Collected output files (absolute host paths)
    pub output_files: Vec<PathBuf>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes container invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<RunOutput>;
}

/// Runner shelling out to the docker CLI
#[derive(Debug, Clone)]
pub struct DockerRunner {
    runtime_path: String,
}

impl DockerRunner {
    pub fn new() -> Self {
        Self {
            runtime_path: "docker".to_string(),
        }
    }

    /// Use a custom runtime binary (e.g. podman)
    pub fn with_runtime_path(runtime_path: String) -> Self {
        Self { runtime_path }
    }
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `docker run` argument list for an invocation.
///
/// Environment variables are emitted in sorted key order so the argv is
/// deterministic. A multi-element entrypoint override maps to
/// `--entrypoint <first>` with the remaining elements prepended to the
/// command list, matching what the docker CLI can express.
pub fn build_run_args(invocation: &ContainerInvocation) -> Vec<String> {
    let options = &invocation.options;
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", invocation.work_dir.display(), CONTAINER_WORKDIR),
        "-w".to_string(),
        CONTAINER_WORKDIR.to_string(),
    ];

    if let Some(network) = &options.network_mode {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    if let Some(pull) = &options.pull {
        args.push("--pull".to_string());
        args.push(pull.as_str().to_string());
    }

    let mut leading_commands: Vec<String> = Vec::new();
    if let Some(entrypoint) = &options.entrypoint {
        if let Some((first, rest)) = entrypoint.split_first() {
            args.push("--entrypoint".to_string());
            args.push(first.clone());
            leading_commands.extend(rest.iter().cloned());
        }
    }

    let mut env: Vec<_> = invocation.env.iter().collect();
    env.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(
        options
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
    );
    args.extend(leading_commands);
    args.extend(invocation.commands.iter().cloned());
    args
}

/// Classify a completed `docker run` that never reached the tool.
///
/// The docker CLI reserves exit codes 125 (the run command itself failed,
/// e.g. daemon error or unpullable image), 126 (contained command not
/// invocable) and 127 (contained command not found). 126/127 can also come
/// from a shell inside the container, so those two are only treated as
/// runtime failures when stderr carries docker's own `docker:` error prefix.
fn runtime_failure(exit_code: i32, stderr: &str) -> Option<RunnerError> {
    let docker_reported = stderr.lines().any(|line| line.starts_with("docker:"));
    let failed = match exit_code {
        125 => true,
        126 | 127 => docker_reported,
        _ => false,
    };
    if failed {
        let detail = stderr.trim();
        let message = if detail.is_empty() {
            format!("container runtime exited with code {}", exit_code)
        } else {
            detail.to_string()
        };
        Some(RunnerError::CLIError(message))
    } else {
        None
    }
}

/// Collect declared output files that exist under the work dir after a run
async fn collect_output_files(work_dir: &Path, declared: &[String]) -> Vec<PathBuf> {
    let mut collected = Vec::new();
    for name in declared {
        let path = work_dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            collected.push(path);
        } else {
            warn!(file = %name, "Declared output file was not produced");
        }
    }
    collected
}

#[async_trait]
impl CommandRunner for DockerRunner {
    #[instrument(skip(self, invocation), fields(image = ?invocation.options.image))]
    async fn run(&self, invocation: &ContainerInvocation) -> Result<RunOutput> {
        let args = build_run_args(invocation);
        debug!(
            "Executing container run: {} {}",
            self.runtime_path,
            args.join(" ")
        );

        let output = tokio::process::Command::new(&self.runtime_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RunnerError::NotInstalled,
                _ => RunnerError::Spawn {
                    message: e.to_string(),
                },
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // An infrastructure failure means the tool never executed; that is an
        // error, unlike a non-zero exit from the tool itself.
        if let Some(failure) = runtime_failure(exit_code, &stderr) {
            return Err(failure.into());
        }
        debug!(exit_code, "Container run completed");

        let output_files =
            collect_output_files(&invocation.work_dir, &invocation.output_files).await;

        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
            output_files,
        })
    }
}
