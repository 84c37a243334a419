//! Log output setup.
//!
//! Logs go to stderr so the `stdout` driver's output stays clean. `RUST_LOG`
//! takes precedence over `--log-level` when set.

use anyhow::{anyhow, Result};
use cyclegen_core::LoggingConfig;
use tracing_subscriber::EnvFilter;

pub fn init(config: &LoggingConfig) -> Result<()> {
    config.validate().map_err(|message| anyhow!(message))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if config.format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|err| anyhow!("failed to initialise logging: {err}"))
}
