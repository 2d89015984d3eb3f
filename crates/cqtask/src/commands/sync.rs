//! `cqtask sync` — execute a CloudQuery sync

use anyhow::{Context, Result};
use cqtask_core::config::ConfigSource;
use cqtask_core::fetch::DefaultFetcher;
use cqtask_core::runner::{ContainerOptions, DockerRunner};
use cqtask_core::state::FsStateStore;
use cqtask_core::sync::Sync;
use std::sync::Arc;
use tracing::debug;

use crate::cli::SyncArgs;
use crate::commands::{report, CommandContext};

pub async fn execute(args: SyncArgs, context: CommandContext) -> Result<i32> {
    let sources = args
        .configs
        .iter()
        .enumerate()
        .map(|(index, raw)| ConfigSource::from_yaml_str(index, raw))
        .collect::<cqtask_core::errors::Result<Vec<_>>>()?;
    debug!(configs = sources.len(), incremental = args.incremental, "Parsed config sources");

    let state_root = context
        .state_dir
        .unwrap_or_else(FsStateStore::default_root);
    let store = Arc::new(
        FsStateStore::new(&state_root)
            .with_context(|| format!("Failed to open state store at {}", state_root.display()))?,
    );

    let options = ContainerOptions {
        image: args.image,
        network_mode: args.network,
        ..Default::default()
    };

    let sync = Sync::new(sources)
        .with_env(args.env.into_iter().collect())
        .with_options(options)
        .incremental(args.incremental);

    let runner = DockerRunner::with_runtime_path(context.runtime);
    let output = sync.run(&runner, store, &DefaultFetcher::new()).await?;
    report(&output, context.json)
}
