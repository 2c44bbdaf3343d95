//! Tracing subscriber installation for the CLI.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber with the given filter.
pub fn init_tracing(filter: &str) -> Result<()> {
    let stdout_layer = fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}
