//! `cqtask run` — pass CloudQuery commands through to the container

use anyhow::{Context, Result};
use cqtask_core::cli_task::{CliTask, CliVariant};
use cqtask_core::runner::{ContainerOptions, DockerRunner};
use std::collections::HashMap;

use crate::cli::RunArgs;
use crate::commands::{report, CommandContext};

pub async fn execute(args: RunArgs, context: CommandContext) -> Result<i32> {
    let variant = if args.shell {
        CliVariant::shell()
    } else if args.binary {
        CliVariant::binary()
    } else {
        CliVariant::plain()
    };

    let mut input_files = HashMap::new();
    for (name, path) in &args.input_files {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file '{}'", path))?;
        input_files.insert(name.clone(), contents);
    }

    let options = ContainerOptions {
        image: args.image,
        network_mode: args.network,
        ..Default::default()
    };

    let task = CliTask::new(args.commands)
        .with_env(args.env.into_iter().collect())
        .with_options(options)
        .with_variant(variant)
        .with_input_files(input_files)
        .with_output_files(args.output_files);

    let runner = DockerRunner::with_runtime_path(context.runtime);
    let output = task.run(&runner).await?;
    report(&output, context.json)
}
