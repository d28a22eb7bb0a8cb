//! Logging setup and the crate's logging macros.
//!
//! Library code logs through the `log_*!` macros, which forward to `tracing`
//! under the `pizarra_client` target. The binary calls [`init`] once.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pizarra_client=debug";

/// Install the global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}

#[doc(hidden)]
pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "pizarra_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "pizarra_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "pizarra_client", "{}", msg);
}

#[doc(hidden)]
pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "pizarra_client", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
