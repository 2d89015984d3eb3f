//! Error types and handling
//!
//! The error taxonomy is structured with specific error enums for each domain
//! (configuration, incremental state, container runner) that are then wrapped
//! in the main CqTaskError enum for unified error handling.
//!
//! A non-zero exit code reported by the CloudQuery process is deliberately NOT
//! part of this taxonomy: it is surfaced as data in
//! [`crate::runner::RunOutput`] and the caller decides pass/fail policy.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A referenced config source could not be dereferenced or parsed
    #[error("Failed to resolve config at index {index} from '{uri}': {message}")]
    Resolution {
        index: usize,
        uri: String,
        message: String,
    },

    /// A config source is neither a mapping nor a URI string
    #[error("Invalid config type at index {index}: expected a mapping or a URI string, got {found}")]
    InvalidType { index: usize, found: String },

    /// A normalized document could not be serialized to YAML
    #[error("Failed to serialize config document: {message}")]
    Serialization { message: String },
}

/// Incremental-state errors
///
/// A missing blob in the durable store is an expected outcome (first run) and
/// is expressed as `Ok(None)` by [`crate::state::StateStore::get_blob`], never
/// as a variant here.
#[derive(Error, Debug)]
pub enum StateError {
    /// Local filesystem operation for the state file failed
    #[error("State file I/O error")]
    Io(#[from] std::io::Error),

    /// The durable blob store itself failed
    #[error("State store error: {message}")]
    Store { message: String },
}

/// Container runner errors
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The container runtime binary is not installed or not accessible
    #[error("Container runtime is not installed or not accessible")]
    NotInstalled,

    /// Container runtime CLI command error
    #[error("Container runtime CLI error: {0}")]
    CLIError(String),

    /// The container process could not be spawned
    #[error("Failed to spawn container process: {message}")]
    Spawn { message: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum CqTaskError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Incremental-state errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Container runner errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

/// Convenience type alias for Results with CqTaskError
pub type Result<T> = std::result::Result<T, CqTaskError>;
