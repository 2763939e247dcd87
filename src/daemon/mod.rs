//! Daemon module: daemonization, component wiring, and the main run loop.

pub mod logging;

use std::error::Error;
use std::sync::Arc;

use fork::{daemon, Fork};
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::applog::AppLog;
use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::launch::{LaunchStrategy, ShellLine};
use crate::ops::AppService;
use crate::paths::PathRoots;
use crate::registry::Registry;
use crate::scheduler;
use crate::supervisor::Supervisor;
use crate::updater::UpdateEngine;

/// Result type alias for daemon startup/shutdown.
pub type DaemonRunResult = Result<(), Box<dyn Error>>;

/// Options for one daemon run.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Detach from the terminal and run in the background.
    pub daemonize: bool,
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// If SIGTERM handler registration fails, falls back to SIGINT only with a
/// warning message.
async fn wait_for_shutdown() {
    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received SIGINT (Ctrl+C), shutting down");
                },
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                },
            }
        }
        Err(e) => {
            warn!(error = %e, "could not register SIGTERM handler, using SIGINT only");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "failed waiting for SIGINT");
            } else {
                info!("received SIGINT (Ctrl+C), shutting down");
            }
        }
    }
}

/// Daemonize the current process.
///
/// The parent process exits immediately with code 0 and the child continues
/// as a background daemon.
///
/// # Note
///
/// This function MUST be called BEFORE starting the Tokio runtime, as
/// forking after Tokio initialization corrupts global state for signal
/// handling.
pub fn daemonize_process(nochdir: bool, noclose: bool) -> DaemonRunResult {
    match daemon(nochdir, noclose) {
        Ok(Fork::Child) => Ok(()),
        Ok(Fork::Parent(_)) => {
            std::process::exit(0);
        }
        Err(e) => Err(Box::new(std::io::Error::other(format!(
            "Failed to daemonize: {}",
            e
        )))),
    }
}

/// Run the daemon.
///
/// Daemonizes first when requested, initializes logging, then starts the
/// Tokio runtime, wires the components, auto-starts flagged applications,
/// and runs until SIGINT/SIGTERM. On shutdown every running application is
/// stopped and the registry is persisted.
pub fn run(options: DaemonOptions) -> DaemonRunResult {
    // CRITICAL: daemonize BEFORE starting the Tokio runtime.
    if options.daemonize {
        // Keep the working directory: state documents live next to the
        // executable, not under /.
        daemonize_process(true, false)?;
    }

    logging::init();
    info!(daemonize = options.daemonize, "kit daemon starting");

    let runtime = Runtime::new().map_err(|e| {
        Box::new(std::io::Error::other(format!(
            "Failed to create Tokio runtime: {}",
            e
        ))) as Box<dyn Error>
    })?;

    runtime.block_on(async {
        let service = match wire_components() {
            Ok(service) => service,
            Err(e) => {
                error!(error = %e, "daemon startup failed");
                return;
            }
        };

        service.autostart_all().await;

        let shutdown = CancellationToken::new();
        let loops = scheduler::spawn_loops(&service, &shutdown);
        info!("daemon running, press Ctrl+C or send SIGTERM to stop");

        wait_for_shutdown().await;

        shutdown.cancel();
        service.shutdown().await;
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop did not exit cleanly");
            }
        }
    });

    info!("daemon stopped");
    Ok(())
}

/// Builds the full component graph rooted at the executable's directory.
fn wire_components() -> Result<Arc<AppService>, Box<dyn Error>> {
    let roots = PathRoots::discover()?;
    let bus = EventBus::new();
    let config = Arc::new(ConfigStore::load_or_default(&roots.exe_dir, bus.clone()));
    let registry = Arc::new(Registry::load_or_default(&roots.exe_dir, bus.clone()));
    let applog = Arc::new(AppLog::new(config.clone(), roots.clone(), bus.clone()));
    let launcher: Arc<dyn LaunchStrategy> = Arc::new(ShellLine);
    let updater = Arc::new(UpdateEngine::new(
        registry.clone(),
        config.clone(),
        applog.clone(),
        roots.clone(),
        launcher.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(
        registry.clone(),
        config.clone(),
        updater.clone(),
        applog,
        roots.clone(),
        launcher,
    ));
    Ok(Arc::new(AppService::new(
        registry, supervisor, updater, config, bus, roots,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_options_default_to_foreground() {
        let options = DaemonOptions::default();
        assert!(!options.daemonize);
    }

    #[test]
    fn wire_components_builds_the_graph() {
        // Wiring only touches the executable's directory for state
        // documents; building the graph itself must succeed anywhere.
        let service = wire_components().expect("components wire");
        assert_eq!(Arc::strong_count(&service), 1);
    }
}
