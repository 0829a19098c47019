#![forbid(unsafe_code)]

//! Structured JSON logging setup.
//!
//! Stagehand emits `tracing` spans and events under the `stagehand.*`
//! targets. Hosts that have no subscriber of their own can install a JSON
//! one here.

use tracing_subscriber::EnvFilter;

/// Install a global JSON subscriber filtered by `directives`
/// (e.g. `"stagehand=debug"`). `RUST_LOG` wins when set.
pub fn init_json(directives: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .try_init()?;
    Ok(())
}
