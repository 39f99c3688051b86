//! Filesystem roots used for discovery and process scanning

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the kernel interfaces are mounted
///
/// Defaults match a normal Linux system. Tests point these at fixture trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sysfs mount point
    pub sysfs_root: PathBuf,
    /// procfs mount point
    pub proc_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Config {
    /// Create a config rooted at custom sysfs/procfs locations
    pub fn with_roots(sysfs_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            proc_root: proc_root.into(),
        }
    }

    /// `<sysfs>/class/drm`
    pub fn drm_class_dir(&self) -> PathBuf {
        self.sysfs_root.join("class").join("drm")
    }
}
