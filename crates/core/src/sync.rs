//! The sync task
//!
//! Top-level operation: fetch the incremental state into a fresh run
//! workspace, normalize the caller's configs, write each document to its own
//! YAML file, invoke `cloudquery sync <files..>` in a container, then persist
//! the state file back whatever exit code the tool reported.

use crate::config::{incremental_sqlite_destination, normalize, BackendOptions, ConfigSource};
use crate::errors::{ConfigError, Result};
use crate::fetch::ContentFetcher;
use crate::runner::{CommandRunner, ContainerInvocation, ContainerOptions, RunOutput};
use crate::state::{IncrementalStateManager, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A CloudQuery sync invocation
#[derive(Debug, Clone, Default)]
pub struct Sync {
    /// Extra environment variables for the CloudQuery process
    pub env: HashMap<String, String>,
    /// Container options; image and pull policy are defaulted when absent
    pub options: ContainerOptions,
    /// Configurations, inline or referenced by URI
    pub configs: Vec<ConfigSource>,
    /// Persist incremental cursor state across runs
    pub incremental: bool,
}

impl Sync {
    pub fn new(configs: Vec<ConfigSource>) -> Self {
        Self {
            configs,
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

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Run the sync.
    ///
    /// Any failure before the container starts (config resolution, state
    /// fetch, file writes) propagates without invoking the tool or persisting
    /// state. Once the container call completes, the incremental DB file is
    /// persisted regardless of the reported exit code, so partial progress
    /// survives tool failures. The exit code itself is returned as data.
    #[instrument(skip_all, fields(configs = self.configs.len(), incremental = self.incremental))]
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        store: Arc<dyn StateStore>,
        fetcher: &dyn ContentFetcher,
    ) -> Result<RunOutput> {
        let workspace = TempDir::new().map_err(crate::errors::StateError::Io)?;
        let state = IncrementalStateManager::new(store);
        let db_file = state.fetch(workspace.path()).await?;

        let backend = BackendOptions::default();
        let mut documents = normalize(fetcher, &self.configs, self.incremental, &backend).await?;
        if self.incremental {
            // Appended after all user-supplied documents, never reordered
            documents.push(incremental_sqlite_destination());
        }

        let mut commands = vec!["sync".to_string()];
        for document in &documents {
            let file_name = format!("{}.yml", Uuid::new_v4().simple());
            let yaml = document.to_yaml()?;
            tokio::fs::write(workspace.path().join(&file_name), yaml)
                .await
                .map_err(|e| ConfigError::Serialization {
                    message: format!("failed to write config file: {}", e),
                })?;
            commands.push(file_name);
        }
        debug!(files = documents.len(), "Wrote config files");

        let invocation = ContainerInvocation {
            options: self.options.clone().with_defaults(),
            commands,
            env: self.env.clone(),
            work_dir: workspace.path().to_path_buf(),
            output_files: vec![],
        };
        let output = runner.run(&invocation).await?;

        if !output.stderr.is_empty() {
            // The tool logs progress to stderr; surface it as a warning, not
            // a failure.
            warn!(stderr = %output.stderr.trim_end(), "CloudQuery wrote to stderr");
        }
        info!(exit_code = output.exit_code, "Sync completed");

        // Persist whatever the run produced, success or not.
        state.persist(&db_file).await?;
        Ok(output)
    }
}
