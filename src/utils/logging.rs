//! Conditional logging macros.
//!
//! `log_info!`, `log_warn!` and `log_error!` check a module-level `ENABLE_LOGS`
//! flag, so a noisy module can be silenced without touching `RUST_LOG`:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn, log_error};
//!
//! log_warn!("create impression failed: {err:#}");
//! ```
//!
//! `debug_log!` takes the tracker's `debug` flag as its first argument and
//! promotes lifecycle lines from `debug` to `info` when it is set.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Tracker lifecycle line, `info` when `$enabled` is true, otherwise `debug`.
#[macro_export]
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)*) => {
        if $enabled {
            log::info!(target: "behavior_tracker", $($arg)*);
        } else {
            log::debug!(target: "behavior_tracker", $($arg)*);
        }
    };
}
