//! Integration tests for the update engine, exercised against local git
//! repositories (no network). Requires `git` on the PATH, which the engine
//! itself requires anyway.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use kit_daemon::applog::AppLog;
use kit_daemon::config::ConfigStore;
use kit_daemon::events::EventBus;
use kit_daemon::launch::{LaunchStrategy, ShellLine};
use kit_daemon::paths::PathRoots;
use kit_daemon::registry::Registry;
use kit_daemon::updater::UpdateEngine;
use kit_daemon::{AppState, DaemonError, SubApplication};

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    registry: Arc<Registry>,
    engine: UpdateEngine,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().to_path_buf();
    let bus = EventBus::new();
    let roots = PathRoots::at(&root);
    let config = Arc::new(ConfigStore::load_or_default(&root, bus.clone()));
    let registry = Arc::new(Registry::empty(&root, bus.clone()));
    let applog = Arc::new(AppLog::new(config.clone(), roots.clone(), bus));
    let launcher: Arc<dyn LaunchStrategy> = Arc::new(ShellLine);
    let engine = UpdateEngine::new(registry.clone(), config, applog, roots, launcher);
    Fixture {
        _dir: dir,
        root,
        registry,
        engine,
    }
}

/// Runs one git command in `dir`, panicking on failure (test harness only).
fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Creates an upstream repository with one commit on `main`.
fn init_upstream(root: &Path) -> PathBuf {
    let upstream = root.join("upstream");
    fs::create_dir_all(&upstream).expect("mkdir");
    let status = Command::new("git")
        .arg("-C")
        .arg(&upstream)
        .args(["init", "-b", "main"])
        .output()
        .expect("git init");
    assert!(status.status.success());
    git(&upstream, &["config", "user.email", "tests@example.com"]);
    git(&upstream, &["config", "user.name", "tests"]);
    fs::write(upstream.join("README.md"), "v1\n").expect("write");
    git(&upstream, &["add", "."]);
    git(&upstream, &["commit", "-m", "initial"]);
    upstream
}

fn commit_upstream(upstream: &Path, file: &str, content: &str) {
    fs::write(upstream.join(file), content).expect("write");
    git(upstream, &["add", "."]);
    git(upstream, &["commit", "-m", "update"]);
}

async fn add_app(fix: &Fixture, upstream: &Path) -> String {
    let app = fix
        .registry
        .insert(SubApplication {
            name: "checkout-app".into(),
            repo_url: upstream.to_string_lossy().into_owned(),
            branch: "main".into(),
            path: "checkout".into(),
            ..Default::default()
        })
        .await
        .expect("inserts");
    app.id
}

fn checkout_dir(fix: &Fixture) -> PathBuf {
    fix.root.join("applications").join("checkout")
}

#[tokio::test]
async fn install_clones_and_marks_installed() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;

    fix.engine.install(&id).await.expect("install succeeds");

    let dir = checkout_dir(&fix);
    assert!(dir.join(".git").exists(), "checkout cloned");
    assert!(dir.join("README.md").is_file());

    let app = fix.registry.get(&id).await.expect("exists");
    assert!(app.installed);
    assert!(app.first_run);
}

#[tokio::test]
async fn install_with_unreachable_remote_fails_without_marking() {
    let fix = fixture();
    let id = {
        let app = fix
            .registry
            .insert(SubApplication {
                name: "ghost".into(),
                repo_url: fix.root.join("no-such-upstream").to_string_lossy().into_owned(),
                branch: "main".into(),
                path: "ghost-checkout".into(),
                ..Default::default()
            })
            .await
            .expect("inserts");
        app.id
    };

    let err = fix.engine.install(&id).await.expect_err("clone must fail");
    assert!(matches!(err, DaemonError::SourceControl { op: "clone", .. }));

    let app = fix.registry.get(&id).await.expect("exists");
    assert!(!app.installed, "failed install must not mark installed");
    assert_eq!(
        app.status,
        AppState::Stopped,
        "install failures do not produce a Failed status"
    );
}

#[tokio::test]
async fn check_for_updates_without_checkout_reports_none() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;

    let has = fix.engine.check_for_updates(&id).await.expect("check succeeds");
    assert!(!has, "missing checkout reports no update, never installs");
    assert!(
        !checkout_dir(&fix).join(".git").exists(),
        "check must not clone"
    );
}

#[tokio::test]
async fn check_for_updates_sees_new_commits_without_mutating() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;
    fix.engine.install(&id).await.expect("install succeeds");

    let has = fix.engine.check_for_updates(&id).await.expect("check succeeds");
    assert!(!has, "fresh clone is current");

    commit_upstream(&upstream, "feature.txt", "new\n");
    let has = fix.engine.check_for_updates(&id).await.expect("check succeeds");
    assert!(has);
    assert!(fix.registry.get(&id).await.expect("exists").has_updates);
    assert!(
        !checkout_dir(&fix).join("feature.txt").exists(),
        "check must not touch the working tree"
    );
}

#[tokio::test]
async fn update_with_clean_worktree_creates_no_stash() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;
    fix.engine.install(&id).await.expect("install succeeds");
    commit_upstream(&upstream, "feature.txt", "new\n");

    fix.engine.update(&id).await.expect("update succeeds");

    let dir = checkout_dir(&fix);
    assert!(dir.join("feature.txt").is_file(), "pull applied");
    assert_eq!(
        git(&dir, &["stash", "list"]).trim(),
        "",
        "clean worktree must never create a stash"
    );
    assert!(!fix.registry.get(&id).await.expect("exists").has_updates);
}

#[tokio::test]
async fn update_with_dirty_worktree_stashes_and_restores() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;
    fix.engine.install(&id).await.expect("install succeeds");

    // Stash commits need an identity in the checkout.
    let dir = checkout_dir(&fix);
    git(&dir, &["config", "user.email", "tests@example.com"]);
    git(&dir, &["config", "user.name", "tests"]);

    // Local uncommitted edit to a tracked file.
    fs::write(dir.join("README.md"), "v1\nlocal note\n").expect("write");
    commit_upstream(&upstream, "feature.txt", "new\n");

    fix.engine.update(&id).await.expect("update succeeds");

    let readme = fs::read_to_string(dir.join("README.md")).expect("readable");
    assert!(
        readme.contains("local note"),
        "local edits must survive the update"
    );
    assert!(dir.join("feature.txt").is_file(), "remote update applied");
    assert_eq!(
        git(&dir, &["stash", "list"]).trim(),
        "",
        "the stash must be applied and removed"
    );
}

#[tokio::test]
async fn update_when_up_to_date_is_a_no_op() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;
    fix.engine.install(&id).await.expect("install succeeds");

    let head_before = git(&checkout_dir(&fix), &["rev-parse", "HEAD"]);
    fix.engine.update(&id).await.expect("update succeeds");
    let head_after = git(&checkout_dir(&fix), &["rev-parse", "HEAD"]);
    assert_eq!(head_before, head_after);
}

#[tokio::test]
async fn update_with_missing_checkout_substitutes_install() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;

    fix.engine.update(&id).await.expect("update installs");

    assert!(checkout_dir(&fix).join(".git").exists());
    let app = fix.registry.get(&id).await.expect("exists");
    assert!(app.installed);
}

#[tokio::test]
async fn uninstall_removes_checkout_and_record() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let id = add_app(&fix, &upstream).await;
    fix.engine.install(&id).await.expect("install succeeds");
    assert!(checkout_dir(&fix).exists());

    fix.engine.uninstall(&id).await.expect("uninstall succeeds");

    assert!(!checkout_dir(&fix).exists(), "checkout removed");
    assert!(fix.registry.get(&id).await.is_none(), "record evicted");
}

#[tokio::test]
async fn setup_command_runs_in_install_directory() {
    let fix = fixture();
    let upstream = init_upstream(&fix.root);
    let app = fix
        .registry
        .insert(SubApplication {
            name: "setup-app".into(),
            repo_url: upstream.to_string_lossy().into_owned(),
            branch: "main".into(),
            path: "checkout".into(),
            setup_command: "touch $dir/setup-ran".into(),
            ..Default::default()
        })
        .await
        .expect("inserts");

    fix.engine.install(&app.id).await.expect("install succeeds");
    assert!(
        checkout_dir(&fix).join("setup-ran").is_file(),
        "setup command must run with $dir expanded"
    );
}
