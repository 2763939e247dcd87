//! The application registry: the shared, lock-guarded collection of
//! [`SubApplication`] records plus its JSON persistence.
//!
//! The registry is the single source of truth for which applications exist
//! and what their persisted fields are. It is passed as an explicit
//! `Arc<Registry>` dependency to every component; there is no ambient global
//! state. All mutations serialize through one write lock so concurrent
//! requests, the supervisor, and the update checker observe a total order.
//!
//! Persistence rewrites the whole document (`subapplications.json`, indented
//! JSON) on every mutation; every successful persist publishes a
//! `subapplications` snapshot. A persistence failure is logged and leaves
//! the in-memory state authoritative until the next successful persist.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::events::{EventBus, EventKind};
use crate::{AppState, DaemonError, DaemonResult, SubAppStatus, SubApplication};

/// File name of the persisted registry document.
pub const SUBAPPLICATIONS_FILE: &str = "subapplications.json";

/// Lock-guarded ordered collection of sub-application records.
pub struct Registry {
    path: PathBuf,
    apps: RwLock<Vec<SubApplication>>,
    bus: EventBus,
}

impl Registry {
    /// Loads the registry from `dir/subapplications.json`.
    ///
    /// A missing or unreadable document yields an empty registry (expected
    /// on first launch); runtime fields are normalized to their stopped
    /// state since no process survives a daemon restart.
    pub fn load_or_default(dir: &Path, bus: EventBus) -> Self {
        let path = dir.join(SUBAPPLICATIONS_FILE);
        let mut apps: Vec<SubApplication> = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(apps) => apps,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "registry document invalid, starting empty");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no registry document, starting empty");
                Vec::new()
            }
        };
        for app in &mut apps {
            app.running = false;
            app.status = AppState::Stopped;
        }
        Self {
            path,
            apps: RwLock::new(apps),
            bus,
        }
    }

    /// Creates an empty registry persisting to `dir` (test seam).
    pub fn empty(dir: &Path, bus: EventBus) -> Self {
        Self {
            path: dir.join(SUBAPPLICATIONS_FILE),
            apps: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Returns a clone of every record, in insertion order.
    pub async fn list(&self) -> Vec<SubApplication> {
        self.apps.read().await.clone()
    }

    /// Returns the id/status pair for every record.
    pub async fn statuses(&self) -> Vec<SubAppStatus> {
        self.apps.read().await.iter().map(|a| a.status_only()).collect()
    }

    /// Looks up a record by id.
    pub async fn get(&self, id: &str) -> Option<SubApplication> {
        self.apps.read().await.iter().find(|a| a.id == id).cloned()
    }

    /// Looks up a record by id, then by display name.
    pub async fn find(&self, id_or_name: &str) -> Option<SubApplication> {
        let apps = self.apps.read().await;
        apps.iter()
            .find(|a| a.id == id_or_name)
            .or_else(|| apps.iter().find(|a| a.name == id_or_name))
            .cloned()
    }

    /// Appends a new record, assigning a generated id when absent.
    ///
    /// Rejects with [`DaemonError::AlreadyExists`] when the incoming id is
    /// already present: no mutation, no event.
    pub async fn insert(&self, mut app: SubApplication) -> DaemonResult<SubApplication> {
        {
            let mut apps = self.apps.write().await;
            if !app.id.is_empty() && apps.iter().any(|a| a.id == app.id) {
                return Err(DaemonError::AlreadyExists(app.id));
            }
            if app.id.is_empty() {
                app.id = uuid::Uuid::new_v4().to_string();
            }
            apps.push(app.clone());
        }
        self.persist().await;
        Ok(app)
    }

    /// Replaces the persisted fields of an existing record.
    ///
    /// Runtime fields (`status`, `running`) stay supervisor-owned and are
    /// carried over from the current record. Returns
    /// [`DaemonError::NotFound`] for an unknown id.
    pub async fn replace(&self, app: SubApplication) -> DaemonResult<SubApplication> {
        let replaced = {
            let mut apps = self.apps.write().await;
            let Some(current) = apps.iter_mut().find(|a| a.id == app.id) else {
                return Err(DaemonError::NotFound(app.id));
            };
            let mut app = app;
            app.status = current.status;
            app.running = current.running;
            *current = app.clone();
            app
        };
        self.persist().await;
        Ok(replaced)
    }

    /// Removes a record by id, returning it. Persists only when something
    /// was actually evicted; removing an unknown id is a no-op.
    pub async fn evict(&self, id: &str) -> Option<SubApplication> {
        let evicted = {
            let mut apps = self.apps.write().await;
            let index = apps.iter().position(|a| a.id == id)?;
            Some(apps.remove(index))
        };
        self.persist().await;
        evicted
    }

    /// Mutates one record through a closure and persists.
    ///
    /// Returns `false` without persisting when the id is unknown.
    pub async fn update_app<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut SubApplication),
    {
        let found = {
            let mut apps = self.apps.write().await;
            match apps.iter_mut().find(|a| a.id == id) {
                Some(app) => {
                    mutate(app);
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    /// Sets the lifecycle state of one application and publishes the full
    /// `statuses` snapshot (all applications, not a diff), so observers
    /// always receive a consistent picture.
    ///
    /// Status is transient: the transition is not persisted here.
    pub async fn set_status(&self, id: &str, status: AppState) {
        let snapshot = {
            let mut apps = self.apps.write().await;
            if let Some(app) = apps.iter_mut().find(|a| a.id == id) {
                app.status = status;
            }
            apps.iter().map(|a| a.status_only()).collect::<Vec<_>>()
        };
        self.bus.publish(EventKind::Statuses, &snapshot);
    }

    /// Records whether a live process handle exists. Not persisted and not
    /// published; the accompanying status transition carries the event.
    pub async fn set_running(&self, id: &str, running: bool) {
        let mut apps = self.apps.write().await;
        if let Some(app) = apps.iter_mut().find(|a| a.id == id) {
            app.running = running;
        }
    }

    /// Writes the whole collection as indented JSON and publishes a
    /// `subapplications` snapshot on success.
    ///
    /// A write failure is logged and swallowed: in-memory state stays
    /// authoritative and the next successful persist reconciles the
    /// document.
    pub async fn persist(&self) {
        let apps = self.apps.read().await.clone();
        match serde_json::to_string_pretty(&apps) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    let err = DaemonError::Persistence {
                        path: self.path.clone(),
                        source: e,
                    };
                    tracing::error!(error = %err, "registry persist failed");
                    return;
                }
                self.bus.publish(EventKind::SubApplications, &apps);
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "registry serialization failed");
            }
        }
    }

    /// Path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn named(name: &str) -> SubApplication {
        SubApplication {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_generates_unique_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::empty(dir.path(), EventBus::new());

        let a = registry.insert(named("a")).await.expect("inserts");
        let b = registry.insert(named("b")).await.expect("inserts");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id_without_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = EventBus::new();
        let registry = Registry::empty(dir.path(), bus.clone());
        let a = registry.insert(named("a")).await.expect("inserts");

        let mut rx = bus.subscribe();
        let mut dup = named("imposter");
        dup.id = a.id.clone();
        let err = registry.insert(dup).await.expect_err("duplicate rejected");
        assert!(matches!(err, DaemonError::AlreadyExists(id) if id == a.id));
        assert_eq!(registry.list().await.len(), 1);
        assert!(
            rx.try_recv().is_err(),
            "rejected add must not publish an event"
        );
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::empty(dir.path(), EventBus::new());
        let a = registry.insert(named("a")).await.expect("inserts");

        assert!(registry.evict(&a.id).await.is_some());
        assert!(registry.evict(&a.id).await.is_none(), "second evict is a no-op");
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn replace_preserves_runtime_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::empty(dir.path(), EventBus::new());
        let a = registry.insert(named("a")).await.expect("inserts");
        registry.set_status(&a.id, AppState::Running).await;
        registry.set_running(&a.id, true).await;

        let mut changed = named("a-renamed");
        changed.id = a.id.clone();
        let replaced = registry.replace(changed).await.expect("replaces");
        assert_eq!(replaced.name, "a-renamed");
        assert_eq!(replaced.status, AppState::Running);
        assert!(replaced.running);
    }

    #[tokio::test]
    async fn replace_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::empty(dir.path(), EventBus::new());
        let mut ghost = named("ghost");
        ghost.id = "missing".to_string();
        let err = registry.replace(ghost).await.expect_err("unknown id");
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_status_publishes_full_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = EventBus::new();
        let registry = Registry::empty(dir.path(), bus.clone());
        let a = registry.insert(named("a")).await.expect("inserts");
        let b = registry.insert(named("b")).await.expect("inserts");

        let mut rx = bus.subscribe();
        registry.set_status(&a.id, AppState::Starting).await;

        let event = rx.recv().await.expect("statuses event");
        assert_eq!(event.kind, EventKind::Statuses);
        let statuses: Vec<SubAppStatus> =
            serde_json::from_value(event.data).expect("payload parses");
        assert_eq!(statuses.len(), 2, "snapshot carries every application");
        assert!(statuses.iter().any(|s| s.id == a.id && s.status == AppState::Starting));
        assert!(statuses.iter().any(|s| s.id == b.id && s.status == AppState::Stopped));
    }

    #[tokio::test]
    async fn persist_writes_indented_document_and_publishes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = EventBus::new();
        let registry = Registry::empty(dir.path(), bus.clone());
        let mut rx = bus.subscribe();

        registry.insert(named("a")).await.expect("inserts");

        let event = rx.recv().await.expect("subapplications event");
        assert_eq!(event.kind, EventKind::SubApplications);

        let content =
            fs::read_to_string(dir.path().join(SUBAPPLICATIONS_FILE)).expect("document exists");
        assert!(content.contains('\n'), "document must be indented");
        let on_disk: Vec<SubApplication> =
            serde_json::from_str(&content).expect("document parses");
        assert_eq!(on_disk.len(), 1);
    }

    #[tokio::test]
    async fn load_normalizes_runtime_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let registry = Registry::empty(dir.path(), EventBus::new());
            let a = registry.insert(named("a")).await.expect("inserts");
            registry
                .update_app(&a.id, |app| {
                    app.running = true;
                    app.status = AppState::Running;
                })
                .await;
        }
        let registry = Registry::load_or_default(dir.path(), EventBus::new());
        let apps = registry.list().await;
        assert_eq!(apps.len(), 1);
        assert!(!apps[0].running, "no process survives a daemon restart");
        assert_eq!(apps[0].status, AppState::Stopped);
    }

    #[tokio::test]
    async fn find_matches_id_then_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::empty(dir.path(), EventBus::new());
        let a = registry.insert(named("alpha")).await.expect("inserts");

        assert_eq!(registry.find(&a.id).await.expect("by id").name, "alpha");
        assert_eq!(registry.find("alpha").await.expect("by name").id, a.id);
        assert!(registry.find("beta").await.is_none());
    }
}
