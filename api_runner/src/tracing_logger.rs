//! Tracing subscriber setup and structured call logging

use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_subscriber(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    info!("Tracing logger initialized");
}

/// Log the outcome of one call to a node or oracle
pub fn log_external_call(service: &str, method: &str, duration: Duration, error: Option<&str>) {
    if let Some(err) = error {
        error!(
            service = %service,
            method = %method,
            duration_ms = duration.as_millis() as u64,
            error = %err,
            "External call failed"
        );
    } else {
        debug!(
            service = %service,
            method = %method,
            duration_ms = duration.as_millis() as u64,
            "External call completed"
        );
    }
}
