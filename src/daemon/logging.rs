//! Logging initialization for the kit daemon.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `KITD_LOG` environment variable. Falls back to `info` level when the
//! variable is unset.
//!
//! # Usage
//!
//! ```bash
//! # Default (info level)
//! kitd daemon
//!
//! # Debug level
//! KITD_LOG=debug kitd daemon
//!
//! # Module-specific filtering
//! KITD_LOG=kit_daemon=debug,warn kitd daemon
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Reads the `KITD_LOG` environment variable for filter directives and
/// falls back to `info` when the variable is unset or invalid. Output goes
/// to stderr, which works in both foreground and daemonized modes.
///
/// # Panics
///
/// Panics if a global subscriber has already been set (should only be
/// called once, at daemon startup).
pub fn init() {
    let filter = EnvFilter::try_from_env("KITD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
