//! Launch strategy: how an assembled command line becomes an OS process.
//!
//! Launch and setup commands are authored as whole argument lines, not argv
//! arrays: the first whitespace token is the executable and the remainder is
//! passed as a single command-line string through the platform's command
//! interpreter (`sh -c` on Unix, `cmd /C` on Windows). The strategy is a
//! trait so the dispatch mechanism can be swapped (notably in tests).

use std::path::Path;

use tokio::process::Command;

/// Builds the [`Command`] that launches a subprocess.
pub trait LaunchStrategy: Send + Sync {
    /// Builds a command for `exec` with the argument line `line`, running in
    /// `cwd`. The returned command has no stdio configuration applied.
    fn command(&self, exec: &str, line: &str, cwd: &Path) -> Command;
}

/// Default strategy: hand the whole line to the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLine;

impl LaunchStrategy for ShellLine {
    fn command(&self, exec: &str, line: &str, cwd: &Path) -> Command {
        let full = if line.is_empty() {
            exec.to_string()
        } else {
            format!("{exec} {line}")
        };
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(full);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(full);
            cmd
        };
        cmd.current_dir(cwd);
        cmd
    }
}

/// Splits a raw command string into its executable and the remaining line.
pub fn split_line(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((exec, rest)) => (exec.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Expands the `$dir` placeholder to the resolved install directory.
pub fn substitute_dir(raw: &str, dir: &Path) -> String {
    raw.replace("$dir", &dir.to_string_lossy())
}
