//! Log output.
//!
//! Everything goes to stderr through `tracing-subscriber`. Running tasks get a
//! spinner from `tracing-indicatif`, and log lines are printed above the
//! spinners. The level defaults to `info` and can be changed with the
//! `WPBUILD_LOG` environment variable, e.g. `WPBUILD_LOG=debug`.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "WPBUILD_LOG";

/// Installs the global subscriber. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}
