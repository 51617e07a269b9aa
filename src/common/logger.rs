use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::configs::LoggingConfig;

/// Installs the global tracing subscriber.
///
/// Library code never calls this; it is meant for binaries and applications
/// that have no subscriber of their own. `RUST_LOG` overrides the configured
/// level and filters.
pub fn init(config: Option<&LoggingConfig>) {
    let log_level = config
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");

    let filters = config.and_then(|l| l.filters.as_deref()).unwrap_or("");

    let filter_str = if filters.is_empty() {
        log_level.to_string()
    } else {
        format!("{},{}", log_level, filters)
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
}
