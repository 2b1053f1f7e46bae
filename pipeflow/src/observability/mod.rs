//! Logging setup.
//!
//! Pipeflow emits `tracing` events: process spawn and exit, line startup,
//! failures of non-terminal line stages and cancellation at debug level, and
//! a `pipeline_run` span with a unique `run_id` around every top-level run.
//! Applications that already install a subscriber need nothing from here.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "pipeflow=info";

/// Output format for [`init_tracing_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global fmt subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already set, which makes repeated calls
/// harmless.
pub fn init_tracing() -> Result<(), TryInitError> {
    init_tracing_with(LogFormat::Pretty)
}

/// Like [`init_tracing`], with a choice of output format.
pub fn init_tracing_with(format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_tracing();
        assert!(init_tracing_with(LogFormat::Json).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<tracing_subscriber::filter::Directive>().is_ok());
    }
}
