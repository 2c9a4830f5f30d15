//! Tracing/logging initialization
//!
//! Headless-only: subsoxy has no TUI, so there is a single fmt layer writing
//! to stdout. `RUST_LOG` overrides the configured log level if set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Precedence: `RUST_LOG` env var > `log_level`.
pub fn init(log_level: &str) {
    let default_filter = format!("subsoxy={},tower_http=debug,axum=debug", log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
