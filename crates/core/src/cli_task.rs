//! CLI passthrough task
//!
//! Runs arbitrary CloudQuery commands in the container without config
//! normalization or incremental state. One component parameterized by
//! [`CliVariant`] covers the command-construction differences between the
//! historical task variants: shell-wrapped with an alias, direct binary
//! prefix, or commands passed through untouched.

use crate::errors::{Result, StateError};
use crate::runner::{
    CommandRunner, ContainerInvocation, ContainerOptions, RunOutput, CLOUDQUERY_BINARY,
};
use std::collections::HashMap;
use tempfile::TempDir;
use tracing::{debug, instrument};

/// How user commands are turned into the container command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStyle {
    /// Run through `/bin/sh -c` with a `cloudquery` alias preamble
    ShellAlias,
    /// Prefix each command with the tool binary path
    BinaryPrefix,
    /// Pass commands through untouched
    Direct,
}

/// Variant parameters for the passthrough task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliVariant {
    pub style: InvocationStyle,
    /// Clear the image entrypoint with the empty-string sentinel
    pub override_entrypoint: bool,
}

impl CliVariant {
    /// Shell-wrapped variant: alias preamble plus entrypoint override. This
    /// is the interactive `cloudquery ...` surface.
    pub fn shell() -> Self {
        Self {
            style: InvocationStyle::ShellAlias,
            override_entrypoint: true,
        }
    }

    /// Binary-prefix variant: each command becomes an argv for the binary
    pub fn binary() -> Self {
        Self {
            style: InvocationStyle::BinaryPrefix,
            override_entrypoint: true,
        }
    }

    /// Plain variant: commands are already full argv strings
    pub fn plain() -> Self {
        Self {
            style: InvocationStyle::Direct,
            override_entrypoint: false,
        }
    }
}

impl Default for CliVariant {
    fn default() -> Self {
        Self::shell()
    }
}

/// A passthrough CloudQuery invocation
#[derive(Debug, Clone, Default)]
pub struct CliTask {
    pub env: HashMap<String, String>,
    pub options: ContainerOptions,
    /// User-supplied command strings
    pub commands: Vec<String>,
    pub variant: CliVariant,
    /// Files written into the workspace before the run (name -> contents)
    pub input_files: HashMap<String, String>,
    /// Workspace-relative files collected after the run
    pub output_files: Vec<String>,
}

impl CliTask {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_variant(mut self, variant: CliVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_input_files(mut self, input_files: HashMap<String, String>) -> Self {
        self.input_files = input_files;
        self
    }

    pub fn with_output_files(mut self, output_files: Vec<String>) -> Self {
        self.output_files = output_files;
        self
    }

    /// Assemble the container command list for this task's variant
    fn build_commands(&self) -> Vec<String> {
        match self.variant.style {
            InvocationStyle::ShellAlias => {
                let mut script = vec![format!("alias cloudquery='{}'", CLOUDQUERY_BINARY)];
                script.extend(self.commands.iter().cloned());
                vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    script.join("\n"),
                ]
            }
            InvocationStyle::BinaryPrefix => self
                .commands
                .iter()
                .map(|command| format!("{} {}", CLOUDQUERY_BINARY, command))
                .collect(),
            InvocationStyle::Direct => self.commands.clone(),
        }
    }

    /// Run the commands in the container and return the result verbatim.
    ///
    /// Supplied input files are always materialized into the workspace and
    /// declared output files always collected, whatever the variant.
    #[instrument(skip_all, fields(commands = self.commands.len()))]
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<RunOutput> {
        let workspace = TempDir::new().map_err(StateError::Io)?;

        for (name, contents) in &self.input_files {
            tokio::fs::write(workspace.path().join(name), contents)
                .await
                .map_err(StateError::Io)?;
        }
        if !self.input_files.is_empty() {
            debug!(files = self.input_files.len(), "Materialized input files");
        }

        let mut options = self.options.clone();
        if self.variant.override_entrypoint {
            options = options.with_shell_entrypoint();
        }

        let invocation = ContainerInvocation {
            options: options.with_defaults(),
            commands: self.build_commands(),
            env: self.env.clone(),
            work_dir: workspace.path().to_path_buf(),
            output_files: self.output_files.clone(),
        };
        runner.run(&invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn task(variant: CliVariant, commands: &[&str]) -> CliTask {
        CliTask::new(commands.iter().map(|c| c.to_string()).collect()).with_variant(variant)
    }

    /// Captures the invocation and the workspace contents while the
    /// workspace still exists.
    #[derive(Default)]
    struct MockRunner {
        seen: Mutex<Option<(ContainerInvocation, Vec<String>)>>,
    }

    impl MockRunner {
        fn seen(&self) -> (ContainerInvocation, Vec<String>) {
            self.seen.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl CommandRunner for MockRunner {
        async fn run(&self, invocation: &ContainerInvocation) -> Result<RunOutput> {
            let mut files: Vec<String> = std::fs::read_dir(&invocation.work_dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            files.sort();
            *self.seen.lock().unwrap() = Some((invocation.clone(), files));
            Ok(RunOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                output_files: vec![],
            })
        }
    }

    #[test]
    fn test_shell_alias_commands() {
        let task = task(
            CliVariant::shell(),
            &["cloudquery sync config.yml --log-console"],
        );
        let commands = task.build_commands();

        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], "/bin/sh");
        assert_eq!(commands[1], "-c");
        assert_eq!(
            commands[2],
            "alias cloudquery='/app/cloudquery'\ncloudquery sync config.yml --log-console"
        );
    }

    #[test]
    fn test_binary_prefix_commands() {
        let task = task(CliVariant::binary(), &["sync a.yml", "migrate b.yml"]);
        assert_eq!(
            task.build_commands(),
            vec![
                "/app/cloudquery sync a.yml".to_string(),
                "/app/cloudquery migrate b.yml".to_string(),
            ]
        );
    }

    #[test]
    fn test_direct_commands_pass_through() {
        let task = task(CliVariant::plain(), &["sync", "a.yml"]);
        assert_eq!(task.build_commands(), vec!["sync", "a.yml"]);
    }

    #[test]
    fn test_variant_presets() {
        assert_eq!(CliVariant::shell().style, InvocationStyle::ShellAlias);
        assert!(CliVariant::shell().override_entrypoint);
        assert_eq!(CliVariant::binary().style, InvocationStyle::BinaryPrefix);
        assert!(!CliVariant::plain().override_entrypoint);
    }

    #[tokio::test]
    async fn test_input_files_materialized_for_every_variant() {
        for variant in [CliVariant::shell(), CliVariant::binary(), CliVariant::plain()] {
            let runner = MockRunner::default();
            let mut input_files = HashMap::new();
            input_files.insert("config.yml".to_string(), "kind: source\n".to_string());

            task(variant, &["sync config.yml"])
                .with_input_files(input_files)
                .run(&runner)
                .await
                .unwrap();

            let (_, files) = runner.seen();
            assert_eq!(files, vec!["config.yml"], "variant {:?}", variant);
        }
    }

    #[tokio::test]
    async fn test_output_files_declared_for_every_variant() {
        for variant in [CliVariant::shell(), CliVariant::plain()] {
            let runner = MockRunner::default();
            task(variant, &["sync config.yml"])
                .with_output_files(vec!["out.json".to_string()])
                .run(&runner)
                .await
                .unwrap();

            let (invocation, _) = runner.seen();
            assert_eq!(invocation.output_files, vec!["out.json"], "variant {:?}", variant);
        }
    }

    #[tokio::test]
    async fn test_shell_variant_overrides_entrypoint() {
        let runner = MockRunner::default();
        task(CliVariant::shell(), &["cloudquery --version"])
            .run(&runner)
            .await
            .unwrap();

        let (invocation, _) = runner.seen();
        assert_eq!(invocation.options.entrypoint, Some(vec![String::new()]));
    }
}
