//! Logging initialization.
//!
//! Stdout carries the child's output byte for byte, so every log line goes
//! to stderr.
//!
//! Environment variables:
//! - `RUST_LOG`: log filter (default: `warn`)
//! - `PROCMUX_LOG_JSON`: JSON output when `1` or `true` (default: false)

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. Calling it twice is harmless;
/// the second call keeps the first subscriber.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let use_json = std::env::var("PROCMUX_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("Warning: logging already initialized: {err}");
    }
}
