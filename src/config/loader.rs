//! Shared configuration store with JSON persistence.
//!
//! The configuration is read once at startup and mutated only through
//! [`ConfigStore::update`], which persists the document before the change is
//! considered applied and then publishes a `config` event.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::Config;
use crate::events::{EventBus, EventKind};
use crate::{DaemonError, DaemonResult};

/// File name of the configuration document, created next to the executable.
pub const CONFIG_FILE: &str = "config.json";

/// Lock-guarded configuration shared across components.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Config>,
    bus: EventBus,
}

impl ConfigStore {
    /// Loads the configuration from `dir/config.json`, falling back to the
    /// defaults when the file is absent or unreadable (a missing document on
    /// first launch is expected, not an error).
    pub fn load_or_default(dir: &Path, bus: EventBus) -> Self {
        let path = dir.join(CONFIG_FILE);
        let config = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config document invalid, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no config document, using defaults");
                Config::default()
            }
        };
        Self {
            path,
            inner: RwLock::new(config),
            bus,
        }
    }

    /// Returns a snapshot of the current configuration.
    pub fn get(&self) -> Config {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies a string-keyed change set, persists, and publishes `config`.
    ///
    /// The persisted write happens before the update is reported applied; a
    /// persist failure surfaces as [`DaemonError::Persistence`] while the
    /// in-memory change stays in effect (the next successful persist
    /// reconciles disk with memory).
    pub fn update(&self, changes: &HashMap<String, String>) -> DaemonResult<Config> {
        let snapshot = {
            let mut config = self.inner.write().unwrap_or_else(|e| e.into_inner());
            config.apply_changes(changes);
            config.clone()
        };
        self.persist(&snapshot)?;
        self.bus.publish(EventKind::Config, &snapshot);
        Ok(snapshot)
    }

    /// Mutates the configuration through a closure, persisting and
    /// publishing only when the closure reports a change. Used by the path
    /// resolver to write resolved defaults back.
    pub fn update_with<F>(&self, mutate: F) -> DaemonResult<Config>
    where
        F: FnOnce(&mut Config) -> bool,
    {
        let (changed, snapshot) = {
            let mut config = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let changed = mutate(&mut config);
            (changed, config.clone())
        };
        if changed {
            self.persist(&snapshot)?;
            self.bus.publish(EventKind::Config, &snapshot);
        }
        Ok(snapshot)
    }

    /// Path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, config: &Config) -> DaemonResult<()> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| DaemonError::Persistence {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?;
        fs::write(&self.path, json).map_err(|e| DaemonError::Persistence {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Writes a default configuration document at `dir/config.json`.
///
/// Refuses to overwrite an existing file unless `force` is set. Used by the
/// `config init` CLI subcommand.
pub fn write_default(dir: &Path, force: bool) -> DaemonResult<PathBuf> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        return Err(DaemonError::Persistence {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "configuration file already exists (use --force to overwrite)",
            ),
        });
    }
    let json = serde_json::to_string_pretty(&Config::default())
        .map_err(|e| DaemonError::Persistence {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
    fs::write(&path, json).map_err(|e| DaemonError::Persistence {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn missing_document_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load_or_default(dir.path(), EventBus::new());
        assert_eq!(store.get(), Config::default());
    }

    #[test]
    fn invalid_document_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "{not json").expect("write");
        let store = ConfigStore::load_or_default(dir.path(), EventBus::new());
        assert_eq!(store.get(), Config::default());
    }

    #[test]
    fn update_persists_before_returning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load_or_default(dir.path(), EventBus::new());

        let changes = HashMap::from([("logFolder".to_string(), "logs-alt".to_string())]);
        let config = store.update(&changes).expect("update succeeds");
        assert_eq!(config.log_folder, "logs-alt");

        let on_disk: Config = serde_json::from_str(
            &fs::read_to_string(dir.path().join(CONFIG_FILE)).expect("document exists"),
        )
        .expect("document parses");
        assert_eq!(on_disk.log_folder, "logs-alt");
    }

    #[tokio::test]
    async fn update_publishes_config_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = ConfigStore::load_or_default(dir.path(), bus);

        let changes = HashMap::from([("dataFolder".to_string(), "shared".to_string())]);
        store.update(&changes).expect("update succeeds");

        let event = rx.recv().await.expect("config event published");
        assert_eq!(event.kind, EventKind::Config);
        assert_eq!(event.data["dataFolder"], "shared");
    }

    #[test]
    fn update_with_skips_persist_when_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load_or_default(dir.path(), EventBus::new());

        store.update_with(|_| false).expect("no-op succeeds");
        assert!(
            !dir.path().join(CONFIG_FILE).exists(),
            "unchanged config must not be written"
        );
    }

    #[test]
    fn write_default_refuses_existing_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_default(dir.path(), false).expect("first write succeeds");
        assert!(write_default(dir.path(), false).is_err());
        write_default(dir.path(), true).expect("forced overwrite succeeds");
    }

    #[test]
    fn reload_round_trips_persisted_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = ConfigStore::load_or_default(dir.path(), EventBus::new());
            let changes =
                HashMap::from([("checkDisksInterval".to_string(), "25".to_string())]);
            store.update(&changes).expect("update succeeds");
        }
        let store = ConfigStore::load_or_default(dir.path(), EventBus::new());
        assert_eq!(store.get().check_disks_interval, 25);
    }
}
