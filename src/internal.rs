//! Console output for the library's own diagnostics.
//!
//! Internal components log about themselves through [`TraceLogger`] and
//! plain `tracing` macros. Binaries and tests that want to see that output
//! call [`init`] once at startup.
//!
//! [`TraceLogger`]: crate::logger::TraceLogger

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a console subscriber for internal logs, filtered by `RUST_LOG`
/// (default `info`). Call once at application startup; later calls are
/// no-ops because a global subscriber is already set.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
