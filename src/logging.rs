//! Structured logging initialization.
//!
//! One-time tracing setup shared by binaries, tests, and embedding hosts.
//! The filter comes from `RELAY_LOG` (falling back to `RUST_LOG`, then
//! `info`); `RELAY_LOG_FORMAT=json` switches to newline-delimited JSON for
//! log shippers.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops, as is calling it when an embedding host already
/// installed a subscriber.
pub fn init_telemetry() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("RELAY_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let json_output = std::env::var("RELAY_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json_output {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true),
                )
                .with(EnvFilter::new(filter))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(EnvFilter::new(filter))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
