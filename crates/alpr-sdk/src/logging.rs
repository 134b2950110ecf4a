//! Logging setup with ALPR segment prefixes.
//!
//! The engine installs a subscriber on `init` using the configured
//! `debug_level` as the default filter. `RUST_LOG` wins when set. Hosts that
//! already installed their own subscriber keep it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with a custom default filter.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_filter(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .is_ok()
}

/// ALPR segment prefixes for logging.
pub mod prefix {
    /// Engine startup prefix
    pub const ENGINE_OPEN: &str = "✿";
    /// Engine shutdown prefix
    pub const ENGINE_CLOSE: &str = "❀";
    /// Parallel delivery worker prefix
    pub const DELIVERY: &str = "꩜";
    /// Asset and accelerator cache prefix
    pub const ASSETS: &str = "⊔";
}
