//! Operation dispatcher: the boundary the transport layer calls.
//!
//! `AppService` wires the registry, supervisor, update engine, and
//! configuration together and exposes the operation taxonomy as methods
//! mapping 1:1 onto component calls. [`AppService::dispatch`] accepts the
//! wire-shaped [`Request`] and routes by verb; unknown verbs are an
//! [`DaemonError::InvalidOperation`].
//!
//! Events are published explicitly after each successful mutation (never on
//! scope exit), so publish-after-persist ordering stays obvious.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, ConfigStore};
use crate::disk::{self, DiskSpace};
use crate::events::{EventBus, EventKind};
use crate::flags::{self, FlagsAndGroups};
use crate::kits;
use crate::paths::PathRoots;
use crate::registry::Registry;
use crate::supervisor::Supervisor;
use crate::updater::UpdateEngine;
use crate::{DaemonError, DaemonResult, SubAppStatus, SubApplication};

/// Wire shape of one inbound request.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Request {
    /// Operation verb (case-insensitive).
    pub request: String,
    /// Opaque correlation id, echoed back by the transport.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Application payload for app-scoped verbs.
    pub app: Option<SubApplication>,
    /// Field changes for the `config` verb.
    pub config: Option<HashMap<String, String>>,
}

/// Facade over the wired daemon components.
pub struct AppService {
    registry: Arc<Registry>,
    supervisor: Arc<Supervisor>,
    updater: Arc<UpdateEngine>,
    config: Arc<ConfigStore>,
    bus: EventBus,
    roots: PathRoots,
}

impl AppService {
    pub fn new(
        registry: Arc<Registry>,
        supervisor: Arc<Supervisor>,
        updater: Arc<UpdateEngine>,
        config: Arc<ConfigStore>,
        bus: EventBus,
        roots: PathRoots,
    ) -> Self {
        Self {
            registry,
            supervisor,
            updater,
            config,
            bus,
            roots,
        }
    }

    /// Adds a new application; duplicate ids are rejected with no mutation
    /// and no event. When `auto_start` is set the application is started
    /// right away (start failures are observable through status, not here).
    pub async fn add(&self, app: SubApplication) -> DaemonResult<SubApplication> {
        let added = self.registry.insert(app).await?;
        if added.auto_start {
            if let Err(e) = self.supervisor.start(&added.id).await {
                tracing::warn!(app = %added.name, error = %e, "auto-start failed");
            }
        }
        Ok(added)
    }

    /// Replaces an application's definition. A running application is
    /// stopped first and started again under the new definition.
    pub async fn modify(&self, app: SubApplication) -> DaemonResult<SubApplication> {
        let current = self
            .registry
            .get(&app.id)
            .await
            .ok_or_else(|| DaemonError::NotFound(app.id.clone()))?;
        let was_running = current.running || self.supervisor.is_running(&current.id).await;

        if was_running {
            self.supervisor.stop(&current.id).await?;
        }
        let replaced = self.registry.replace(app).await?;
        if was_running {
            self.supervisor.start(&replaced.id).await?;
        }
        self.registry
            .get(&replaced.id)
            .await
            .ok_or(DaemonError::NotFound(replaced.id))
    }

    /// Removes an application from the registry, stopping it first when
    /// running. Removing an unknown id is an idempotent no-op.
    pub async fn remove(&self, id: &str) -> DaemonResult<()> {
        let Some(app) = self.registry.get(id).await else {
            return Ok(());
        };
        if app.running || self.supervisor.is_running(id).await {
            self.supervisor.stop(id).await?;
        }
        self.registry.evict(id).await;
        Ok(())
    }

    /// Stops the application (when running) and removes its checkout and
    /// registry record.
    pub async fn uninstall(&self, id: &str) -> DaemonResult<()> {
        if self.registry.get(id).await.is_some() && self.supervisor.is_running(id).await {
            self.supervisor.stop(id).await?;
        }
        self.updater.uninstall(id).await
    }

    /// Full registry snapshot; published as `subapplications`.
    pub async fn list_all(&self) -> Vec<SubApplication> {
        let apps = self.registry.list().await;
        self.bus.publish(EventKind::SubApplications, &apps);
        apps
    }

    /// Status-only snapshot; published as `statuses`.
    pub async fn list_status(&self) -> Vec<SubAppStatus> {
        let statuses = self.registry.statuses().await;
        self.bus.publish(EventKind::Statuses, &statuses);
        statuses
    }

    /// Flag schema for an application, located by id or display name;
    /// published as `flags`.
    pub async fn list_flags(&self, id_or_name: &str) -> DaemonResult<FlagsAndGroups> {
        let app = self
            .registry
            .find(id_or_name)
            .await
            .ok_or_else(|| DaemonError::NotFound(id_or_name.to_string()))?;
        let schema = flags::read_flags(&self.roots.exe_dir, &app.app_type);
        self.bus.publish(EventKind::Flags, &schema);
        Ok(schema)
    }

    /// Disk-space snapshot; published as `diskinfo`.
    pub async fn check_disk_space(&self) -> Vec<DiskSpace> {
        let snapshot = disk::snapshot();
        self.bus.publish(EventKind::DiskInfo, &snapshot);
        snapshot
    }

    /// Merged kit catalog; published as `kits`.
    pub async fn list_available_kits(&self) -> Vec<SubApplication> {
        let kits = kits::list_available_kits(&self.config.get()).await;
        self.bus.publish(EventKind::Kits, &kits);
        kits
    }

    /// Applies a configuration change set (persist-then-publish happens in
    /// the config store).
    pub async fn update_config(&self, changes: &HashMap<String, String>) -> DaemonResult<Config> {
        self.config.update(changes)
    }

    /// Runs every application's update check; any newly discovered update
    /// is already visible through the persisted snapshots.
    pub async fn check_all_updates(&self) {
        self.updater.check_all_updates().await;
    }

    /// Starts every application flagged `auto_start`; used at daemon
    /// startup.
    pub async fn autostart_all(self: &Arc<Self>) {
        for app in self.registry.list().await {
            if app.auto_start {
                if let Err(e) = self.supervisor.start(&app.id).await {
                    tracing::warn!(app = %app.name, error = %e, "auto-start failed");
                }
            }
        }
    }

    /// Shared configuration store (scheduler reads intervals from here).
    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    /// The wired supervisor (daemon shutdown stops all through it).
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Stops every running application and persists the registry; called
    /// once at daemon shutdown.
    pub async fn shutdown(&self) {
        self.supervisor.stop_all().await;
        self.registry.persist().await;
    }

    /// Routes one wire request to the matching operation.
    pub async fn dispatch(&self, request: Request) -> DaemonResult<serde_json::Value> {
        let verb = request.request.to_lowercase();
        match verb.as_str() {
            "add" => {
                let app = require_app(request.app, &verb)?;
                to_value(self.add(app).await?)
            }
            "modify" => {
                let app = require_app(request.app, &verb)?;
                to_value(self.modify(app).await?)
            }
            "remove" => {
                let app = require_app(request.app, &verb)?;
                self.remove(&app.id).await?;
                to_value(true)
            }
            "start" => {
                let app = require_app(request.app, &verb)?;
                self.supervisor.start(&app.id).await?;
                to_value(true)
            }
            "stop" => {
                let app = require_app(request.app, &verb)?;
                self.supervisor.stop(&app.id).await?;
                to_value(true)
            }
            "restart" => {
                let app = require_app(request.app, &verb)?;
                self.supervisor.restart(&app.id).await?;
                to_value(true)
            }
            "install" => {
                let app = require_app(request.app, &verb)?;
                self.updater.install(&app.id).await?;
                to_value(true)
            }
            "update" => {
                let app = require_app(request.app, &verb)?;
                self.updater.update(&app.id).await?;
                to_value(true)
            }
            "uninstall" => {
                let app = require_app(request.app, &verb)?;
                self.uninstall(&app.id).await?;
                to_value(true)
            }
            "listflags" => {
                let app = require_app(request.app, &verb)?;
                let key = if app.id.is_empty() { app.name } else { app.id };
                to_value(self.list_flags(&key).await?)
            }
            "liststatus" => to_value(self.list_status().await),
            "listall" => to_value(self.list_all().await),
            "checkdiskspace" => to_value(self.check_disk_space().await),
            "listavailablekits" => to_value(self.list_available_kits().await),
            "config" => {
                let changes = request.config.unwrap_or_default();
                to_value(self.update_config(&changes).await?)
            }
            other => Err(DaemonError::InvalidOperation(other.to_string())),
        }
    }
}

impl std::fmt::Debug for AppService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppService").finish()
    }
}

fn require_app(app: Option<SubApplication>, verb: &str) -> DaemonResult<SubApplication> {
    app.ok_or_else(|| DaemonError::InvalidOperation(format!("{verb} requires an app payload")))
}

fn to_value<T: serde::Serialize>(value: T) -> DaemonResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| DaemonError::InvalidOperation(format!("unserializable response: {e}")))
}
