//! Periodic maintenance loops.
//!
//! Three independent loops: disk-space snapshots, registry-refresh
//! broadcasts, and update checks. Each reads its interval from the shared
//! configuration on every cycle (so configuration changes take effect
//! without a restart), with zero treated as unset and replaced by the
//! defaults. The loops need no coordination; each simply invokes the
//! corresponding read-only or update-checking operation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ops::AppService;

/// Spawns the three maintenance loops; each runs until `shutdown` fires.
pub fn spawn_loops(service: &Arc<AppService>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        spawn_loop(service, shutdown, "disk-check", |s| s.config_store().get().disk_interval_minutes(), |s| async move {
            s.check_disk_space().await;
        }),
        spawn_loop(service, shutdown, "registry-refresh", |s| s.config_store().get().refresh_interval_minutes(), |s| async move {
            s.list_all().await;
        }),
        spawn_loop(service, shutdown, "update-check", |s| s.config_store().get().update_interval_minutes(), |s| async move {
            s.check_all_updates().await;
        }),
    ]
}

fn spawn_loop<I, F, Fut>(
    service: &Arc<AppService>,
    shutdown: &CancellationToken,
    name: &'static str,
    interval_minutes: I,
    run: F,
) -> JoinHandle<()>
where
    I: Fn(&AppService) -> u64 + Send + 'static,
    F: Fn(Arc<AppService>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let service = Arc::clone(service);
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            let minutes = interval_minutes(&service);
            let sleep = Duration::from_secs(minutes * 60);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(loop_name = name, "scheduler loop stopping");
                    break;
                }
                _ = tokio::time::sleep(sleep) => {}
            }
            tracing::debug!(loop_name = name, "scheduler loop firing");
            run(Arc::clone(&service)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applog::AppLog;
    use crate::config::ConfigStore;
    use crate::events::{EventBus, EventKind};
    use crate::launch::{LaunchStrategy, ShellLine};
    use crate::paths::PathRoots;
    use crate::registry::Registry;
    use crate::supervisor::Supervisor;
    use crate::updater::UpdateEngine;
    use std::collections::HashMap;
    use tokio::time::timeout;

    fn service(dir: &std::path::Path, bus: EventBus) -> Arc<AppService> {
        let roots = PathRoots::at(dir);
        let config = Arc::new(ConfigStore::load_or_default(dir, bus.clone()));
        let registry = Arc::new(Registry::empty(dir, bus.clone()));
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
        Arc::new(AppService::new(
            registry, supervisor, updater, config, bus, roots,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_fires_on_its_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = EventBus::new();
        let service = service(dir.path(), bus.clone());
        // 1 minute keeps the paused-clock advance small.
        service
            .update_config(&HashMap::from([(
                "checkSubApplicationsInterval".to_string(),
                "1".to_string(),
            )]))
            .await
            .expect("config applies");

        let shutdown = CancellationToken::new();
        let handles = spawn_loops(&service, &shutdown);
        let mut rx = bus.subscribe();

        // Let the freshly-spawned loops be polled so they register their
        // sleep timers before the paused clock is advanced.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let event = timeout(Duration::from_secs(1), async {
            loop {
                let event = rx.recv().await.expect("bus open");
                if event.kind == EventKind::SubApplications {
                    break event;
                }
            }
        })
        .await
        .expect("refresh broadcast fires");
        assert_eq!(event.kind, EventKind::SubApplications);

        shutdown.cancel();
        for handle in handles {
            handle.await.expect("loop exits");
        }
    }

    #[tokio::test]
    async fn shutdown_stops_all_loops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path(), EventBus::new());
        let shutdown = CancellationToken::new();
        let handles = spawn_loops(&service, &shutdown);

        shutdown.cancel();
        for handle in handles {
            timeout(Duration::from_secs(2), handle)
                .await
                .expect("loop exits promptly")
                .expect("no panic");
        }
    }
}
