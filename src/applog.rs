//! Per-application log files and console mirroring.
//!
//! Each application logs into daily files under its resolved log directory:
//! `log.<YYYY-MM-DD>.log` for lifecycle messages (RFC 3339 timestamped) and
//! `console.<YYYY-MM-DD>.log` for raw subprocess output. Lifecycle messages
//! are mirrored to the daemon's own log stream and published as `log`
//! events; console lines are published as transient `console` events and
//! never reach the daemon log. Logging failures never fail the calling
//! operation.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::events::{EventBus, EventKind};
use crate::paths::{self, PathRoots};
use crate::SubApplication;

/// Application id used for the daemon's own log directory.
const DAEMON_LOG_ID: &str = "daemon";

/// Payload of `log` and `console` events.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEvent {
    /// The logged line.
    pub message: String,
    /// Originating application id, or `daemon`.
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// Shared handle for per-application logging.
#[derive(Clone)]
pub struct AppLog {
    config: Arc<ConfigStore>,
    roots: PathRoots,
    bus: EventBus,
}

impl AppLog {
    pub fn new(config: Arc<ConfigStore>, roots: PathRoots, bus: EventBus) -> Self {
        Self { config, roots, bus }
    }

    /// Logs a lifecycle message for one application: timestamped line in the
    /// app's daily log file, mirrored to the daemon log, published as `log`.
    pub fn log_app(&self, app: &SubApplication, message: &str) {
        tracing::info!(app = %app.name, "{message}");
        self.write_and_publish(&app.id, message);
    }

    /// Logs a lifecycle message that belongs to no particular application.
    pub fn log_daemon(&self, message: &str) {
        tracing::info!("{message}");
        self.write_and_publish(DAEMON_LOG_ID, message);
    }

    /// Publishes one raw console line for an application. The caller owns
    /// the console file handle and has already written the line.
    pub fn console_event(&self, app_id: &str, line: &str) {
        self.bus.publish(
            EventKind::Console,
            &LogEvent {
                message: line.to_string(),
                app_id: app_id.to_string(),
            },
        );
    }

    /// Opens (append, create) today's console log file in `log_dir`.
    pub fn open_console_file(&self, log_dir: &Path) -> io::Result<File> {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_dir.join(daily_file_name("console")))
    }

    fn write_and_publish(&self, app_id: &str, message: &str) {
        let stamped = format!("[{}] {}", chrono::Utc::now().to_rfc3339(), message);
        match paths::resolve_log_dir(app_id, &self.config.get(), &self.roots) {
            Ok(dir) => {
                if let Err(e) = append_line(&dir.join(daily_file_name("log")), &stamped) {
                    tracing::warn!(app_id, error = %e, "failed to write log file");
                }
            }
            Err(e) => {
                tracing::warn!(app_id, error = %e, "failed to resolve log location");
            }
        }
        self.bus.publish(
            EventKind::Log,
            &LogEvent {
                message: stamped,
                app_id: app_id.to_string(),
            },
        );
    }
}

impl std::fmt::Debug for AppLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLog").finish()
    }
}

/// Daily file name for a log kind: `<prefix>.<YYYY-MM-DD>.log`.
fn daily_file_name(prefix: &str) -> String {
    format!("{prefix}.{}.log", chrono::Local::now().format("%Y-%m-%d"))
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    writeln!(file, "{line}")
}
