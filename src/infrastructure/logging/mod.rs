// Logging module - Logging infrastructure
use crate::domain::error::{SerialMonError, SerialMonResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `--verbose` wins, then `RUST_LOG`, then the configured level.
pub fn build_filter(log_level: &str, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("serialmon=debug,warn");
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = match log_level {
        "error" | "warn" | "info" | "debug" | "trace" => log_level,
        _ => "info",
    };

    EnvFilter::new(format!("serialmon={},warn", level))
}

/// Initialize logging system
pub fn init_logging(log_level: &str, verbose: bool) -> SerialMonResult<()> {
    tracing_subscriber::registry()
        .with(build_filter(log_level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .map_err(|e| SerialMonError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("SerialMon logging system initialized");
    Ok(())
}
