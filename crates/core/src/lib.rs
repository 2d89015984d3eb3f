//! Core library for the CloudQuery container task runner
//!
//! This crate contains the shared logic for config normalization, incremental
//! state persistence, the container runner abstraction, the sync orchestrator,
//! the CLI passthrough task, logging, and error handling.

pub mod cli_task;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod logging;
pub mod runner;
pub mod state;
pub mod sync;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
