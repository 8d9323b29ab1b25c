use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Global flag to control per-tick mixer debug logging
pub static MIX_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set per-tick mixer debug logging on/off
pub fn set_mix_debug(enabled: bool) {
    MIX_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    info!(
        "🔧 Mixer debug logging {}",
        if enabled { "ENABLED" } else { "DISABLED" }
    );
}

/// Check if per-tick mixer debug logging is enabled
pub fn is_mix_debug_enabled() -> bool {
    MIX_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

/// Mixer debug macro - only traces if mixer debug is enabled
#[macro_export]
macro_rules! mix_debug {
    ($($arg:tt)*) => {
        if $crate::log::MIX_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::trace!($($arg)*);
        }
    };
}
