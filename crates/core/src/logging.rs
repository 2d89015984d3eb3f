//! Logging and observability
//!
//! Structured logging via tracing-subscriber with text or JSON formatting,
//! selected at runtime. All output goes to stderr so stdout stays reserved
//! for the tool's own output.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// * `format` — `Some("json")` for structured JSON, anything else for text.
///   Falls back to the `CQTASK_LOG_FORMAT` environment variable.
///
/// The filter level comes from `CQTASK_LOG`, then `RUST_LOG`, then `info`.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("CQTASK_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("CQTASK_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check if logging has been initialized (useful in tests)
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
