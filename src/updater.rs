//! Install/update engine: drives a git-backed checkout through
//! clone/fetch/pull, submodule synchronization, and a stash/restore cycle
//! that preserves uncommitted local edits across remote updates.
//!
//! All version control goes through the `git` CLI (`git -C <dir> ...`) with
//! captured output; a non-zero exit surfaces as
//! [`DaemonError::SourceControl`] carrying the trimmed stderr. Failures
//! abort the enclosing operation and leave partial state in place for manual
//! or next-attempt cleanup; there is no automatic rollback.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::applog::AppLog;
use crate::config::ConfigStore;
use crate::launch::{self, LaunchStrategy};
use crate::links;
use crate::paths::{self, PathRoots};
use crate::registry::Registry;
use crate::{DaemonError, DaemonResult, SubApplication};

/// Stash message used for the update cycle, so a stranded stash is
/// recognizable in `git stash list` after a failed restore.
const STASH_MESSAGE: &str = "kitd-update";

/// Install/update engine shared across the supervisor, the scheduler, and
/// the operation dispatcher.
pub struct UpdateEngine {
    registry: Arc<Registry>,
    config: Arc<ConfigStore>,
    applog: Arc<AppLog>,
    roots: PathRoots,
    launcher: Arc<dyn LaunchStrategy>,
}

impl UpdateEngine {
    pub fn new(
        registry: Arc<Registry>,
        config: Arc<ConfigStore>,
        applog: Arc<AppLog>,
        roots: PathRoots,
        launcher: Arc<dyn LaunchStrategy>,
    ) -> Self {
        Self {
            registry,
            config,
            applog,
            roots,
            launcher,
        }
    }

    /// Clones the repository into the resolved install directory,
    /// initializes submodules, runs the setup command, marks the record
    /// installed, and reconciles symlinks.
    ///
    /// Any failed stage aborts with the partial state left as-is.
    pub async fn install(&self, id: &str) -> DaemonResult<()> {
        let mut app = self.registry.get(id).await.ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        self.applog.log_daemon(&format!("installing subapplication: {}", app.name));

        let dir = self.resolve_install(&mut app).await?;

        let mut clone_args: Vec<&str> = vec!["clone"];
        if !app.branch.is_empty() {
            clone_args.extend(["--branch", app.branch.as_str()]);
        }
        let dir_str = dir.to_string_lossy().into_owned();
        clone_args.extend([app.repo_url.as_str(), dir_str.as_str()]);
        self.git(&app, "clone", None, &clone_args).await?;

        self.git(
            &app,
            "submodule update",
            Some(&dir),
            &["submodule", "update", "--init", "--recursive"],
        )
        .await?;

        self.run_setup_command(&app).await?;

        self.registry
            .update_app(id, |a| {
                a.installed = true;
                a.first_run = true;
            })
            .await;

        self.reconcile_links(&app, &dir);
        self.applog.log_daemon(&format!("installed subapplication {}", app.name));
        Ok(())
    }

    /// Fetches from the remote and reports whether new commits exist on the
    /// tracked branch, recording the answer in `has_updates`.
    ///
    /// A missing checkout reports no update available (it never substitutes
    /// an install), and the working tree is never mutated.
    pub async fn check_for_updates(&self, id: &str) -> DaemonResult<bool> {
        let mut app = self.registry.get(id).await.ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        let dir = self.resolve_install(&mut app).await?;
        if !dir.join(".git").exists() {
            return Ok(false);
        }

        self.git(&app, "fetch", Some(&dir), &["fetch", "origin"]).await?;
        let behind = self.behind_count(&app, &dir).await?;
        self.registry.update_app(id, |a| a.has_updates = behind > 0).await;
        Ok(behind > 0)
    }

    /// Brings an existing checkout up to date: fetch, stash-if-dirty, pull,
    /// restore, submodule sync, setup command, symlink reconciliation.
    ///
    /// A missing checkout substitutes [`UpdateEngine::install`]. "Already up
    /// to date" is success without further action. A stash/pull failure
    /// fails the update and leaves the stash for manual recovery.
    pub async fn update(&self, id: &str) -> DaemonResult<()> {
        let mut app = self.registry.get(id).await.ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        let dir = self.resolve_install(&mut app).await?;
        if !dir.join(".git").exists() {
            self.applog
                .log_daemon(&format!("checkout missing for {}, installing instead", app.name));
            return self.install(id).await;
        }

        self.applog.log_daemon(&format!("updating subapplication: {}", app.name));
        self.git(&app, "fetch", Some(&dir), &["fetch", "origin"]).await?;
        if self.behind_count(&app, &dir).await? == 0 {
            self.applog.log_app(&app, "already up to date");
            self.registry.update_app(id, |a| a.has_updates = false).await;
            return Ok(());
        }

        // A clean worktree yields no stash; a dirty one yields exactly one.
        // Untracked files are excluded: stash would skip them anyway and a
        // pull tolerates them, so counting them would strand an empty stash.
        let dirty = !self
            .git(
                &app,
                "status",
                Some(&dir),
                &["status", "--porcelain", "--untracked-files=no"],
            )
            .await?
            .trim()
            .is_empty();
        if dirty {
            self.git(
                &app,
                "stash",
                Some(&dir),
                &["stash", "push", "--message", STASH_MESSAGE],
            )
            .await?;
        }

        let mut pull_args: Vec<&str> = vec!["pull", "--recurse-submodules", "origin"];
        if !app.branch.is_empty() {
            pull_args.push(app.branch.as_str());
        }
        self.git(&app, "pull", Some(&dir), &pull_args).await?;

        if dirty {
            self.git(&app, "stash pop", Some(&dir), &["stash", "pop"]).await?;
        }

        self.sync_submodules(&app, &dir).await?;
        self.run_setup_command(&app).await?;
        self.registry.update_app(id, |a| a.has_updates = false).await;
        self.reconcile_links(&app, &dir);
        self.applog.log_app(&app, "update complete");
        Ok(())
    }

    /// Removes the install directory recursively and evicts the record.
    /// Stopping a running process first is the operation dispatcher's job.
    pub async fn uninstall(&self, id: &str) -> DaemonResult<()> {
        let mut app = self.registry.get(id).await.ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        self.applog.log_daemon(&format!("uninstalling subapplication: {}", app.name));

        match self.resolve_install(&mut app).await {
            Ok(dir) => {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    tracing::warn!(app = %app.name, path = %dir.display(), error = %e, "failed to remove install directory");
                }
            }
            Err(e) => {
                tracing::warn!(app = %app.name, error = %e, "install location unresolved during uninstall");
            }
        }
        self.registry.evict(id).await;
        Ok(())
    }

    /// Runs every application's update check; used by the scheduler.
    pub async fn check_all_updates(&self) {
        for app in self.registry.list().await {
            if let Err(e) = self.check_for_updates(&app.id).await {
                tracing::warn!(app = %app.name, error = %e, "update check failed");
            }
        }
    }

    /// Runs the configured setup command in the install directory, with
    /// `$dir` expanded and the remainder dispatched as a whole line.
    pub async fn run_setup_command(&self, app: &SubApplication) -> DaemonResult<()> {
        if app.setup_command.is_empty() {
            return Ok(());
        }
        let mut app_mut = app.clone();
        let dir = self.resolve_install(&mut app_mut).await?;
        let full = launch::substitute_dir(&app.setup_command, &dir);
        let (exec, line) = launch::split_line(&full);

        let output = self
            .launcher
            .command(&exec, &line, &dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DaemonError::Spawn {
                app: app.name.clone(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DaemonError::Spawn {
                app: app.name.clone(),
                source: std::io::Error::other(format!(
                    "setup command exited with {}: {}",
                    output.status,
                    stderr.trim()
                )),
            });
        }
        Ok(())
    }

    /// Resolves the install directory, persisting a defaulted logical path
    /// back onto the record.
    async fn resolve_install(&self, app: &mut SubApplication) -> DaemonResult<PathBuf> {
        let config = self.config.get();
        let resolved = paths::resolve_install_dir(app, &config, &self.roots).inspect_err(|e| {
            self.applog
                .log_app(app, &format!("failed to resolve install location: {e}"));
        })?;
        if resolved.entity_changed {
            let path = app.path.clone();
            self.registry.update_app(&app.id, |a| a.path = path).await;
        }
        Ok(resolved.dir)
    }

    /// Per-submodule sync after the top-level pull: fetch each, then run the
    /// recursive update only for submodules whose recorded commit differs
    /// from their current checkout, bounding update cost.
    async fn sync_submodules(&self, app: &SubApplication, dir: &Path) -> DaemonResult<()> {
        if !dir.join(".gitmodules").exists() {
            return Ok(());
        }
        let listing = self
            .git(
                app,
                "submodule list",
                Some(dir),
                &[
                    "config",
                    "--file",
                    ".gitmodules",
                    "--get-regexp",
                    r"^submodule\..*\.path$",
                ],
            )
            .await?;

        for path in parse_submodule_paths(&listing) {
            let sub_dir = dir.join(&path);
            if !sub_dir.join(".git").exists() {
                self.git(
                    app,
                    "submodule update",
                    Some(dir),
                    &["submodule", "update", "--init", "--recursive", "--", &path],
                )
                .await?;
                continue;
            }

            self.git(app, "submodule fetch", Some(&sub_dir), &["fetch"]).await?;

            let desired = self
                .git(app, "ls-tree", Some(dir), &["ls-tree", "HEAD", "--", &path])
                .await
                .map(|out| parse_ls_tree_sha(&out))?;
            let current = self
                .git(app, "rev-parse", Some(&sub_dir), &["rev-parse", "HEAD"])
                .await?
                .trim()
                .to_string();
            if desired.as_deref() == Some(current.as_str()) {
                tracing::debug!(app = %app.name, submodule = %path, "submodule unchanged, skipping update");
                continue;
            }
            self.git(
                app,
                "submodule update",
                Some(dir),
                &["submodule", "update", "--init", "--recursive", "--", &path],
            )
            .await?;
        }
        Ok(())
    }

    /// Commits on the remote branch not yet in HEAD.
    async fn behind_count(&self, app: &SubApplication, dir: &Path) -> DaemonResult<u64> {
        let upstream = if app.branch.is_empty() {
            "@{upstream}".to_string()
        } else {
            format!("origin/{}", app.branch)
        };
        let range = format!("HEAD..{upstream}");
        let out = self
            .git(app, "rev-list", Some(dir), &["rev-list", "--count", &range])
            .await?;
        out.trim().parse().map_err(|_| DaemonError::SourceControl {
            app: app.name.clone(),
            op: "rev-list",
            message: format!("unexpected rev-list output: {}", out.trim()),
        })
    }

    fn reconcile_links(&self, app: &SubApplication, install_dir: &Path) {
        if app.sym_links.is_empty() {
            return;
        }
        match paths::resolve_data_dir(&self.config.get(), &self.roots) {
            Ok(data_dir) => links::reconcile_all(app, install_dir, &data_dir),
            Err(e) => {
                self.applog
                    .log_app(app, &format!("failed to resolve data location: {e}"));
            }
        }
    }

    /// Runs one git invocation with captured output.
    async fn git(
        &self,
        app: &SubApplication,
        op: &'static str,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> DaemonResult<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = cwd {
            cmd.arg("-C").arg(dir);
        }
        let output = cmd
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DaemonError::SourceControl {
                app: app.name.clone(),
                op,
                message: format!("failed to run git: {e}"),
            })?;
        if !output.status.success() {
            let err = DaemonError::SourceControl {
                app: app.name.clone(),
                op,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
            self.applog.log_app(app, &err.to_string());
            return Err(err);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl std::fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine").finish()
    }
}

/// Parses `git config --get-regexp ^submodule\..*\.path$` output into the
/// listed paths (second column of each line).
fn parse_submodule_paths(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_once(' ').map(|(_, path)| path.trim().to_string()))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Extracts the object sha from one `git ls-tree` line
/// (`<mode> <type> <sha>\t<path>`).
fn parse_ls_tree_sha(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .nth(2)
        .map(|sha| sha.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_submodule_paths_extracts_second_column() {
        let listing = "submodule.vendor/dep.path vendor/dep\nsubmodule.other.path libs/other\n";
        assert_eq!(
            parse_submodule_paths(listing),
            vec!["vendor/dep".to_string(), "libs/other".to_string()]
        );
    }

    #[test]
    fn parse_submodule_paths_of_empty_listing_is_empty() {
        assert!(parse_submodule_paths("").is_empty());
    }

    #[test]
    fn parse_ls_tree_sha_reads_third_field() {
        let line = "160000 commit 2f7ab93c7e6f1f1a0dce6e923c9f1c8b8a4f9d1e\tvendor/dep";
        assert_eq!(
            parse_ls_tree_sha(line).as_deref(),
            Some("2f7ab93c7e6f1f1a0dce6e923c9f1c8b8a4f9d1e")
        );
    }
}
