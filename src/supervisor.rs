//! Process supervisor: the per-application lifecycle state machine.
//!
//! Each running sub-application owns exactly one OS process, a cancellation
//! token, and a console log file handle; all three live in the application's
//! runtime slot and are cleared atomically with the `Stopped` transition.
//! Every slot sits behind its own async mutex, so the "does a live handle
//! exist" check and the action it guards are atomic per application:
//! concurrent `start`/`stop`/output-triggered `restart` on the same
//! application cannot double-spawn or double-kill. The coarse registry lock
//! is deliberately not reused for this.
//!
//! Status transitions go through [`Registry::set_status`], which publishes
//! the full `statuses` snapshot for every change.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::applog::AppLog;
use crate::config::ConfigStore;
use crate::launch::{self, LaunchStrategy};
use crate::paths::{self, PathRoots};
use crate::registry::Registry;
use crate::updater::UpdateEngine;
use crate::{AppState, DaemonError, DaemonResult, SubApplication};

/// Pause between the stop and start halves of a restart, letting the OS
/// release ports and file handles.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Runtime ownership of one running sub-application.
struct RunningApp {
    child: Child,
    cancel: CancellationToken,
    /// Console log handle, shared with the output drains; dropped with the
    /// slot when the application stops.
    #[allow(dead_code)]
    console_log: Arc<StdMutex<File>>,
}

type AppSlot = Arc<Mutex<Option<RunningApp>>>;

/// Supervisor over all sub-application processes.
pub struct Supervisor {
    registry: Arc<Registry>,
    config: Arc<ConfigStore>,
    updater: Arc<UpdateEngine>,
    applog: Arc<AppLog>,
    roots: PathRoots,
    launcher: Arc<dyn LaunchStrategy>,
    slots: StdMutex<HashMap<String, AppSlot>>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        config: Arc<ConfigStore>,
        updater: Arc<UpdateEngine>,
        applog: Arc<AppLog>,
        roots: PathRoots,
        launcher: Arc<dyn LaunchStrategy>,
    ) -> Self {
        Self {
            registry,
            config,
            updater,
            applog,
            roots,
            launcher,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Starts an application.
    ///
    /// Runs the update engine first when `auto_update` is set (best-effort:
    /// failures are logged, not fatal to starting). A live handle makes this
    /// a no-op that still normalizes status to `Running`. Path resolution,
    /// log file, and spawn failures transition to `Failed` and are logged
    /// rather than escalated.
    pub async fn start(self: &Arc<Self>, id: &str) -> DaemonResult<()> {
        let app = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DaemonError::NotFound(id.to_string()))?;

        if app.auto_update {
            if let Err(e) = self.updater.update(id).await {
                tracing::warn!(app = %app.name, error = %e, "pre-start update failed");
                self.applog
                    .log_app(&app, &format!("update before start failed: {e}"));
            }
        }

        let slot = self.slot(id);
        let mut guard = slot.lock().await;

        // Re-read the record: the update may have rewritten fields.
        let mut app = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DaemonError::NotFound(id.to_string()))?;

        if guard.is_some() {
            self.applog.log_app(&app, "subprocess is already running");
            self.registry.set_status(id, AppState::Running).await;
            return Ok(());
        }

        self.registry.set_status(id, AppState::Starting).await;

        if let Err(e) = self.updater.run_setup_command(&app).await {
            self.applog
                .log_app(&app, &format!("setup command failed: {e}"));
        }

        if app.first_run {
            let extra = first_run_flags(&app.app_type);
            self.registry
                .update_app(id, |a| {
                    a.flags.extend(extra.iter().map(|f| f.to_string()));
                    a.first_run = false;
                })
                .await;
            app = self
                .registry
                .get(id)
                .await
                .ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        }

        let config = self.config.get();
        let install_dir = match paths::resolve_install_dir(&mut app, &config, &self.roots) {
            Ok(resolved) => {
                if resolved.entity_changed {
                    let path = app.path.clone();
                    self.registry.update_app(id, |a| a.path = path).await;
                }
                resolved.dir
            }
            Err(e) => {
                self.applog
                    .log_app(&app, &format!("failed to resolve install location: {e}"));
                self.registry.set_status(id, AppState::Failed).await;
                return Ok(());
            }
        };

        let log_dir = match paths::resolve_log_dir(&app.id, &config, &self.roots) {
            Ok(dir) => dir,
            Err(e) => {
                self.applog
                    .log_app(&app, &format!("failed to resolve log location: {e}"));
                self.registry.set_status(id, AppState::Failed).await;
                return Ok(());
            }
        };
        let log_location = log_dir.display().to_string();
        if app.log_location != log_location {
            self.registry
                .update_app(id, |a| a.log_location = log_location)
                .await;
        }

        let console_log = match self.applog.open_console_file(&log_dir) {
            Ok(file) => Arc::new(StdMutex::new(file)),
            Err(e) => {
                self.applog
                    .log_app(&app, &format!("error opening log file: {e}"));
                self.registry.set_status(id, AppState::Failed).await;
                return Ok(());
            }
        };

        let exec = launch::substitute_dir(&app.command_exec, &install_dir);
        let line = launch::substitute_dir(&app.command_line(), &install_dir);
        tracing::info!(
            app = %app.name,
            exec = %exec,
            params = %line,
            dir = %install_dir.display(),
            "starting subprocess"
        );

        let mut child = match self.spawn(&exec, &line, &install_dir) {
            Ok(child) => child,
            Err(e) => {
                let err = DaemonError::Spawn {
                    app: app.name.clone(),
                    source: e,
                };
                self.applog.log_app(&app, &err.to_string());
                self.registry.set_status(id, AppState::Failed).await;
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        if let Some(stdout) = child.stdout.take() {
            self.spawn_stdout_drain(app.clone(), stdout, cancel.clone(), console_log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_stderr_drain(app.clone(), stderr, cancel.clone(), console_log.clone());
        }

        *guard = Some(RunningApp {
            child,
            cancel,
            console_log,
        });
        drop(guard);

        self.registry.set_running(id, true).await;
        self.registry.set_status(id, AppState::Running).await;
        self.applog.log_app(&app, "subprocess started");
        Ok(())
    }

    /// Stops an application.
    ///
    /// With no live handle this is idempotent: status normalizes to
    /// `Stopped` and no kill syscall is made. Otherwise the process is
    /// killed, the token cancelled (releasing the output drains), and the
    /// slot cleared.
    pub async fn stop(&self, id: &str) -> DaemonResult<()> {
        let app = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DaemonError::NotFound(id.to_string()))?;

        let slot = self.slot(id);
        let mut guard = slot.lock().await;
        match guard.take() {
            None => {
                self.applog.log_app(&app, "subprocess is not running");
                self.registry.set_running(id, false).await;
                self.registry.set_status(id, AppState::Stopped).await;
                Ok(())
            }
            Some(mut running) => {
                self.registry.set_status(id, AppState::Stopping).await;
                if let Err(e) = running.child.kill().await {
                    self.applog
                        .log_app(&app, &format!("error stopping {}: {e}", app.name));
                }
                running.cancel.cancel();
                drop(guard);

                self.registry.set_running(id, false).await;
                self.registry.set_status(id, AppState::Stopped).await;
                self.applog.log_app(&app, "subprocess stopped");
                Ok(())
            }
        }
    }

    /// Restarts an application: `Restarting`, stop, fixed delay, start.
    pub async fn restart(self: &Arc<Self>, id: &str) -> DaemonResult<()> {
        let app = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DaemonError::NotFound(id.to_string()))?;
        self.applog.log_app(&app, "restarting subprocess");
        self.registry.set_status(id, AppState::Restarting).await;
        self.stop(id).await?;
        tokio::time::sleep(RESTART_DELAY).await;
        self.start(id).await
    }

    /// Whether a live process handle exists for the application.
    pub async fn is_running(&self, id: &str) -> bool {
        self.slot(id).lock().await.is_some()
    }

    /// Stops every application; used on daemon shutdown.
    pub async fn stop_all(&self) {
        for app in self.registry.list().await {
            if let Err(e) = self.stop(&app.id).await {
                tracing::warn!(app = %app.name, error = %e, "failed to stop application");
            }
        }
    }

    fn slot(&self, id: &str) -> AppSlot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(id.to_string()).or_default().clone()
    }

    fn spawn(&self, exec: &str, line: &str, cwd: &Path) -> std::io::Result<Child> {
        self.launcher
            .command(exec, line, cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
    }

    /// Drains standard output: first output confirms `Running`, every line
    /// goes to the console log and event, and lines matching a configured
    /// critical-error phrase trigger at most one restart each.
    fn spawn_stdout_drain(
        self: &Arc<Self>,
        app: SubApplication,
        stdout: ChildStdout,
        cancel: CancellationToken,
        console_log: Arc<StdMutex<File>>,
    ) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut saw_output = false;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        if !saw_output {
                            saw_output = true;
                            sup.registry.set_status(&app.id, AppState::Running).await;
                        }
                        write_console_line(&console_log, &line);
                        sup.applog.console_event(&app.id, &line);

                        if app.restart_on_critical_error {
                            for phrase in &app.critical_error_messages {
                                if !phrase.is_empty() && line.contains(phrase) {
                                    sup.applog.log_app(
                                        &app,
                                        &format!("detected critical message, restarting: {phrase}"),
                                    );
                                    let sup = Arc::clone(&sup);
                                    let id = app.id.clone();
                                    tokio::spawn(async move {
                                        if let Err(e) = sup.restart(&id).await {
                                            tracing::warn!(app_id = %id, error = %e, "critical-error restart failed");
                                        }
                                    });
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });
    }

    /// Drains standard error purely for logging.
    fn spawn_stderr_drain(
        self: &Arc<Self>,
        app: SubApplication,
        stderr: ChildStderr,
        cancel: CancellationToken,
        console_log: Arc<StdMutex<File>>,
    ) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        write_console_line(&console_log, &line);
                        sup.applog.console_event(&app.id, &line);
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Supervisor")
            .field("tracked_slots", &slots.len())
            .finish()
    }
}

fn write_console_line(console_log: &StdMutex<File>, line: &str) {
    let mut file = console_log.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = writeln!(file, "{line}") {
        tracing::debug!(error = %e, "failed to write console log line");
    }
}

/// Extra flags applied once, on the first run after an install.
///
/// Application types whose launchers expect their own type tag get it
/// appended; everything else runs unchanged.
fn first_run_flags(app_type: &str) -> Vec<&'static str> {
    match app_type {
        "comfy" => vec!["comfy"],
        _ => Vec::new(),
    }
}
