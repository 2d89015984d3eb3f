use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    cqtask_core::logging::init(parsed.log_format.as_deref())?;

    // The tool's exit code is surfaced as this process's exit code; taxonomy
    // errors propagate through anyhow and exit non-zero.
    let exit_code = parsed.dispatch().await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
