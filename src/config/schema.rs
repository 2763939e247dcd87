//! Configuration schema: interval tunables and folder locations.
//!
//! Persisted as `config.json` next to the executable, camelCase field names
//! matching the historical document format.

use std::collections::HashMap;

/// Scheduler interval fallbacks, in minutes, applied when the configured
/// value is zero (zero is treated as unset).
pub const DEFAULT_DISK_INTERVAL_MIN: u64 = 60;
pub const DEFAULT_REFRESH_INTERVAL_MIN: u64 = 10;
pub const DEFAULT_UPDATE_INTERVAL_MIN: u64 = 1440;

/// Process-wide tunables.
///
/// Folder fields may be absolute paths or paths relative to the executable
/// directory; empty means "use the built-in default" (see the path
/// resolver's fallback chain).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Minutes between disk-space snapshots (0 = default).
    pub check_disks_interval: u64,
    /// Minutes between registry-refresh broadcasts (0 = default).
    pub check_sub_applications_interval: u64,
    /// Minutes between update checks (0 = default).
    pub check_sub_applications_update_interval: u64,
    /// Root folder for application checkouts.
    pub application_folder: String,
    /// Root folder for per-application logs.
    pub log_folder: String,
    /// Root folder for shared data (symlink destinations).
    pub data_folder: String,
    /// Secondary kit catalog repositories (`owner/repo`), merged after the
    /// primary catalog.
    #[serde(rename = "appKitRepositories")]
    pub kit_repositories: Vec<String>,
}

impl Config {
    /// Disk-check interval with the zero-means-unset rule applied.
    pub fn disk_interval_minutes(&self) -> u64 {
        defaulted(self.check_disks_interval, DEFAULT_DISK_INTERVAL_MIN)
    }

    /// Registry-refresh interval with the zero-means-unset rule applied.
    pub fn refresh_interval_minutes(&self) -> u64 {
        defaulted(
            self.check_sub_applications_interval,
            DEFAULT_REFRESH_INTERVAL_MIN,
        )
    }

    /// Update-check interval with the zero-means-unset rule applied.
    pub fn update_interval_minutes(&self) -> u64 {
        defaulted(
            self.check_sub_applications_update_interval,
            DEFAULT_UPDATE_INTERVAL_MIN,
        )
    }

    /// Applies a string-keyed change set, field by field.
    ///
    /// Interval values that fail to parse as integers are ignored; unknown
    /// keys are ignored. Returns `true` if any field changed.
    pub fn apply_changes(&mut self, changes: &HashMap<String, String>) -> bool {
        let before = self.clone();
        for (key, value) in changes {
            match key.as_str() {
                "checkDisksInterval" => {
                    if let Ok(v) = value.parse() {
                        self.check_disks_interval = v;
                    }
                }
                "checkSubApplicationsInterval" => {
                    if let Ok(v) = value.parse() {
                        self.check_sub_applications_interval = v;
                    }
                }
                "checkSubApplicationsUpdateInterval" => {
                    if let Ok(v) = value.parse() {
                        self.check_sub_applications_update_interval = v;
                    }
                }
                "applicationFolder" => self.application_folder = value.clone(),
                "logFolder" => self.log_folder = value.clone(),
                "dataFolder" => self.data_folder = value.clone(),
                _ => {}
            }
        }
        *self != before
    }
}

fn defaulted(value: u64, fallback: u64) -> u64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}
