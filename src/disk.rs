//! Disk-space snapshots and directory sizing.
//!
//! Disk enumeration is a thin wrapper over `sysinfo`; the interesting part
//! is only the snapshot shape published on the bus.

use std::fs;
use std::io;
use std::path::Path;

use sysinfo::Disks;

/// Space figures for one mounted disk, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiskSpace {
    /// Mount point (or device name when the mount point is not printable).
    pub name: String,
    /// Total capacity.
    pub total: u64,
    /// Currently available space.
    pub free: u64,
}

/// Enumerates every mounted disk with total and available space.
pub fn snapshot() -> Vec<DiskSpace> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .map(|disk| DiskSpace {
            name: disk.mount_point().to_string_lossy().into_owned(),
            total: disk.total_space(),
            free: disk.available_space(),
        })
        .collect()
}

/// Returns the size of a directory and all subfolders in bytes.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += meta.len();
        }
    }
    Ok(size)
}
