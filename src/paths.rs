//! Deterministic fallback resolution of install, log, and data directories.
//!
//! Every logical location resolves through an explicit, ordered list of
//! candidates, accepting the first one whose directory can be created (or
//! already exists):
//!
//! 1. an absolute path set on the entity or in the configuration, used
//!    as-is;
//! 2. the configured relative subfolder joined under the executable's own
//!    directory;
//! 3. a last-resort default name (`applications`, `logs`, `data`) under the
//!    executable's directory.
//!
//! When a lower-priority branch succeeds the resolved choice is written back
//! onto the entity (an empty install `path` defaults to the application id),
//! so resolution is stable on subsequent calls. Exhausting every branch is
//! fatal for the enclosing operation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{DaemonError, DaemonResult, SubApplication};

/// Last-resort folder names under the executable directory.
pub const DEFAULT_APPLICATION_FOLDER: &str = "applications";
pub const DEFAULT_LOG_FOLDER: &str = "logs";
pub const DEFAULT_DATA_FOLDER: &str = "data";

/// Root directories the fallback chains hang off.
///
/// Production code discovers the executable's directory once; tests inject a
/// temporary directory instead.
#[derive(Debug, Clone)]
pub struct PathRoots {
    /// Directory containing the running executable.
    pub exe_dir: PathBuf,
}

impl PathRoots {
    /// Discovers the directory of the current executable.
    pub fn discover() -> io::Result<Self> {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| io::Error::other("executable has no parent directory"))?
            .to_path_buf();
        Ok(Self { exe_dir })
    }

    /// Builds roots around an explicit directory (test seam).
    pub fn at(exe_dir: impl Into<PathBuf>) -> Self {
        Self {
            exe_dir: exe_dir.into(),
        }
    }
}

/// Outcome of an install-directory resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstall {
    /// The directory, created if it did not exist.
    pub dir: PathBuf,
    /// Whether the entity was mutated (empty `path` defaulted to the id);
    /// the caller persists the registry when set.
    pub entity_changed: bool,
}

/// Resolves the install directory for an application.
///
/// An empty logical `path` defaults to the application id before the chain
/// runs, and that default is reported back through
/// [`ResolvedInstall::entity_changed`].
pub fn resolve_install_dir(
    app: &mut SubApplication,
    config: &Config,
    roots: &PathRoots,
) -> DaemonResult<ResolvedInstall> {
    let mut entity_changed = false;
    if app.path.is_empty() {
        app.path = app.id.clone();
        entity_changed = true;
    }

    let logical = PathBuf::from(&app.path);
    let candidates = install_candidates(&logical, config, roots);
    match first_creatable(candidates) {
        Some(dir) => Ok(ResolvedInstall { dir, entity_changed }),
        None => Err(DaemonError::PathResolution {
            app: app.name.clone(),
            what: "install",
        }),
    }
}

fn install_candidates(logical: &Path, config: &Config, roots: &PathRoots) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if logical.is_absolute() {
        candidates.push(logical.to_path_buf());
    }
    let configured = Path::new(&config.application_folder);
    if !config.application_folder.is_empty() {
        if configured.is_absolute() {
            candidates.push(configured.join(logical));
        } else {
            candidates.push(roots.exe_dir.join(configured).join(logical));
        }
    }
    candidates.push(roots.exe_dir.join(DEFAULT_APPLICATION_FOLDER).join(logical));
    candidates
}

/// Resolves the log directory for one application (or `daemon` for the
/// daemon's own log).
///
/// `subdir` is the per-application leaf (the application id); an absolute
/// `subdir` short-circuits the chain entirely.
pub fn resolve_log_dir(subdir: &str, config: &Config, roots: &PathRoots) -> DaemonResult<PathBuf> {
    resolve_subdir(
        subdir,
        &config.log_folder,
        DEFAULT_LOG_FOLDER,
        roots,
        "log",
    )
}

/// Resolves the shared data directory (symlink destination root).
pub fn resolve_data_dir(config: &Config, roots: &PathRoots) -> DaemonResult<PathBuf> {
    resolve_subdir("", &config.data_folder, DEFAULT_DATA_FOLDER, roots, "data")
}

fn resolve_subdir(
    subdir: &str,
    configured: &str,
    fallback: &str,
    roots: &PathRoots,
    what: &'static str,
) -> DaemonResult<PathBuf> {
    let leaf = Path::new(subdir);
    let mut candidates = Vec::new();
    if leaf.is_absolute() {
        candidates.push(leaf.to_path_buf());
    }
    if !configured.is_empty() {
        let configured = Path::new(configured);
        if configured.is_absolute() {
            candidates.push(configured.join(leaf));
        } else {
            candidates.push(roots.exe_dir.join(configured).join(leaf));
        }
    }
    candidates.push(roots.exe_dir.join(fallback).join(leaf));

    first_creatable(candidates).ok_or(DaemonError::PathResolution {
        app: "daemon".to_string(),
        what,
    })
}

/// Walks the candidate list in order and returns the first directory that
/// exists or can be created.
fn first_creatable(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    for candidate in candidates {
        match ensure_dir(&candidate) {
            Ok(()) => return Some(candidate),
            Err(e) => {
                tracing::debug!(path = %candidate.display(), error = %e, "path candidate rejected");
            }
        }
    }
    None
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)
}
