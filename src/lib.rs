//! Kit Daemon library
//!
//! This crate provides the core functionality for the kit daemon: a
//! background process that supervises a dynamic set of git-backed
//! sub-applications. Each sub-application is a repository checkout plus a
//! launch command; the daemon owns its full lifecycle (install, update,
//! start, stop, restart, uninstall) and keeps observers informed of state
//! changes through a broadcast event bus.
//!
//! # Platform Support
//!
//! This crate currently supports **Unix-like systems only** (Linux, macOS).
//! Windows support is planned for a future release.
//!
//! Unix-specific features used:
//! - `fork()` for daemon process creation
//! - Unix signal handling (SIGTERM, SIGINT)
//! - `sh -c` command-line dispatch for launch commands

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Per-application log files and console mirroring.
pub mod applog;

/// Configuration schema and JSON persistence.
pub mod config;

/// Daemon module providing daemonization and the main run loop.
pub mod daemon;

/// Disk-space snapshots and directory sizing.
pub mod disk;

/// Broadcast event bus for observer notifications.
pub mod events;

/// Flag-schema file loading (`<appType>Flags.json`).
pub mod flags;

/// Kit catalog retrieval and de-duplicated merging.
pub mod kits;

/// Launch strategy: whole-line command dispatch through the platform shell.
pub mod launch;

/// Symlink reconciliation between install and data directories.
pub mod links;

/// Operation dispatcher: the boundary the transport layer calls.
pub mod ops;

/// Deterministic fallback resolution of install/log/data directories.
pub mod paths;

/// The application registry: lock-guarded collection plus persistence.
pub mod registry;

/// Periodic disk/refresh/update-check loops.
pub mod scheduler;

/// Process supervisor: per-application lifecycle state machine.
pub mod supervisor;

/// Install/update engine driving git checkouts.
pub mod updater;

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Lifecycle state of a supervised sub-application.
///
/// Transitions happen only inside the supervisor: `Stopped` → `Starting` →
/// `Running` → `Stopping` → `Stopped`, with `Failed` as an alternate
/// terminal for failed start attempts and `Restarting` as the composite
/// stop-then-start label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AppState {
    /// No live process; initial and terminal state.
    #[default]
    Stopped,
    /// Start requested; setup and spawn in progress.
    Starting,
    /// Live process attached.
    Running,
    /// Kill issued, handles being released.
    Stopping,
    /// Composite stop-then-start in progress.
    Restarting,
    /// Start attempt failed (spawn, log file, or path resolution).
    Failed,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Stopped => "Stopped",
            AppState::Starting => "Starting",
            AppState::Running => "Running",
            AppState::Stopping => "Stopping",
            AppState::Restarting => "Restarting",
            AppState::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Error type for parsing an [`AppState`] from its display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAppStateError(pub String);

impl fmt::Display for ParseAppStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid application state: {}", self.0)
    }
}

impl std::error::Error for ParseAppStateError {}

impl FromStr for AppState {
    type Err = ParseAppStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(AppState::Stopped),
            "starting" => Ok(AppState::Starting),
            "running" => Ok(AppState::Running),
            "stopping" => Ok(AppState::Stopping),
            "restarting" => Ok(AppState::Restarting),
            "failed" => Ok(AppState::Failed),
            _ => Err(ParseAppStateError(s.to_string())),
        }
    }
}

/// A managed sub-application: a git-backed checkout plus a launch command.
///
/// Serialized field names match the persisted JSON document
/// (`subapplications.json`), which uses camelCase with the historical
/// `repoURL` spelling. Runtime process handles are owned by the supervisor
/// and never serialized.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubApplication {
    /// Opaque unique identifier, generated once on first add.
    pub id: String,
    /// Display name; not guaranteed unique.
    pub name: String,
    /// Application type; selects a flag schema.
    pub app_type: String,
    /// URL of the backing repository.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Branch to track.
    pub branch: String,
    /// Logical install path; may be relative or empty (defaults to the id).
    pub path: String,
    /// Argument string passed to the executable; `$dir` expands to the
    /// resolved install directory.
    pub command: String,
    /// Executable to launch; `$dir` expands to the resolved install directory.
    pub command_exec: String,
    /// Extra arguments appended to `command`.
    pub flags: Vec<String>,
    /// Command run once after install/update; `$dir` substitutable.
    pub setup_command: String,
    /// Start automatically when added and on daemon startup.
    pub auto_start: bool,
    /// Run the update engine before every start.
    pub auto_update: bool,
    /// Restart when a critical-error phrase appears in the output.
    pub restart_on_critical_error: bool,
    /// Output substrings that trigger an automatic restart.
    pub critical_error_messages: Vec<String>,
    /// Checkout present on disk.
    pub installed: bool,
    /// Set by install, cleared after the first successful start.
    pub first_run: bool,
    /// Remote commits not yet pulled.
    pub has_updates: bool,
    /// Live process attached (eventually consistent with `status`).
    pub running: bool,
    /// Lifecycle state; mutated only through the supervisor.
    pub status: AppState,
    /// Resolved log directory, recorded for observers.
    pub log_location: String,
    /// Source → destination pairs reconciled on install/update.
    pub sym_links: BTreeMap<String, String>,
}

impl SubApplication {
    /// Returns the id/status pair used for `statuses` snapshots.
    pub fn status_only(&self) -> SubAppStatus {
        SubAppStatus {
            id: self.id.clone(),
            status: self.status,
        }
    }

    /// Assembles the full argument line: `command` plus `flags`, space-joined.
    pub fn command_line(&self) -> String {
        if self.flags.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.flags.join(" "))
        }
    }
}

/// Status-only projection of a sub-application for snapshot events.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubAppStatus {
    /// Application id.
    pub id: String,
    /// Current lifecycle state.
    pub status: AppState,
}

/// Errors raised by daemon operations.
///
/// Path-resolution and source-control failures fail the enclosing operation
/// without crashing the daemon and without rolling back partial state.
/// Persistence failures leave the in-memory state authoritative until the
/// next successful persist.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Unknown application id (or name, for flag lookups).
    #[error("application not found: {0}")]
    NotFound(String),

    /// An add carried an id already present in the registry.
    #[error("application already exists: {0}")]
    AlreadyExists(String),

    /// Unrecognized request verb at the operation boundary.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Every branch of a path fallback chain failed.
    #[error("failed to resolve {what} location for {app}")]
    PathResolution {
        /// Application name (or `daemon` for process-wide locations).
        app: String,
        /// Which location was requested (`install`, `log`, `data`).
        what: &'static str,
    },

    /// A git invocation failed (clone, fetch, pull, stash, submodule).
    #[error("source control failure for {app} during {op}: {message}")]
    SourceControl {
        /// Application name.
        app: String,
        /// The git operation that failed.
        op: &'static str,
        /// Captured stderr or I/O error text.
        message: String,
    },

    /// The OS refused to spawn the subprocess.
    #[error("failed to spawn process for {app}")]
    Spawn {
        /// Application name.
        app: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a durable state document failed.
    #[error("failed to persist {path}")]
    Persistence {
        /// Path of the document that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
