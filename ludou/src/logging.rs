//! Tracing/logging setup for the `ludoc` binary
//!
//! The library only emits events; installing a subscriber is the
//! application's call.

use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize tracing (uses RUST_LOG env var, `info` by default).
/// `verbose` lowers the default to `debug`, so cache hits and misses show up.
pub fn init_standard_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}
