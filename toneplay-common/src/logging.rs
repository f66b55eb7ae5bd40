//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence; otherwise the configured level is applied.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used by [`init`]
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global tracing subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
