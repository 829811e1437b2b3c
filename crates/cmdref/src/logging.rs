use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a stderr subscriber so report output on stdout stays clean.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects `debug` and the
/// default is `warn`.
pub fn init(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}
