//! Command implementations

pub mod run;
pub mod sync;

use cqtask_core::runner::RunOutput;
use serde::Serialize;
use std::path::PathBuf;

/// Global options shared by all commands
pub struct CommandContext {
    pub json: bool,
    pub state_dir: Option<PathBuf>,
    pub runtime: String,
}

/// Machine-readable result summary for `--json`
#[derive(Serialize)]
struct RunSummary<'a> {
    exit_code: i32,
    output_files: &'a [PathBuf],
    stdout: &'a str,
    stderr: &'a str,
}

fn json_summary(output: &RunOutput) -> anyhow::Result<String> {
    let summary = RunSummary {
        exit_code: output.exit_code,
        output_files: &output.output_files,
        stdout: &output.stdout,
        stderr: &output.stderr,
    };
    Ok(serde_json::to_string(&summary)?)
}

/// Print the run result and return the tool's exit code.
///
/// In text mode the tool's captured streams are forwarded verbatim; in JSON
/// mode stdout carries only the summary object, which embeds the captured
/// streams.
pub fn report(output: &RunOutput, json: bool) -> anyhow::Result<i32> {
    if json {
        println!("{}", json_summary(output)?);
    } else {
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }
    Ok(output.exit_code)
}
