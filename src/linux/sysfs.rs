//! sysfs device handles and DRM card enumeration
//!
//! A DRM card shows up as `/sys/class/drm/cardN`. Its `device` entry is the
//! parent bus device carrying the PCI attributes (`vendor`, `device`,
//! `enable`), the `driver` link and a `uevent` file with properties such as
//! `PCI_SLOT_NAME`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

/// Handle to one sysfs device directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsDevice {
    path: PathBuf,
}

impl SysfsDevice {
    /// Wrap a sysfs device directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory of this device
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component (e.g., "card0")
    pub fn sysname(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Read an attribute file, trimmed
    pub fn attribute(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.path.join(name))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// All `KEY=VALUE` properties from the `uevent` file
    pub fn properties(&self) -> HashMap<String, String> {
        let Ok(uevent) = fs::read_to_string(self.path.join("uevent")) else {
            return HashMap::new();
        };
        uevent
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect()
    }

    /// One `uevent` property
    pub fn property(&self, name: &str) -> Option<String> {
        self.properties().remove(name)
    }

    /// Name of the kernel driver bound to this device
    pub fn driver(&self) -> Option<String> {
        let target = fs::read_link(self.path.join("driver")).ok()?;
        target.file_name().map(|n| n.to_string_lossy().to_string())
    }

    /// Parent bus device
    pub fn parent(&self) -> Option<SysfsDevice> {
        let parent = self.path.join("device");
        parent.is_dir().then(|| SysfsDevice::new(parent))
    }

    /// Device node relative to `/dev`, from the `DEVNAME` property
    pub fn devname(&self) -> Option<String> {
        self.property("DEVNAME")
    }
}

/// Returns true for primary DRM nodes (`dri/cardN`)
///
/// Render nodes and connectors (`card0-DP-1`) are not primary nodes.
fn is_primary_node(device: &SysfsDevice) -> bool {
    if let Some(devname) = device.devname() {
        return devname
            .strip_prefix("dri/card")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    }
    let name = device.sysname();
    name.strip_prefix("card")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Minor number of a `cardN` node
fn card_index(device: &SysfsDevice) -> Option<u32> {
    device.sysname().strip_prefix("card")?.parse().ok()
}

/// List primary DRM card devices, sorted by card number
pub fn enumerate_drm_cards(config: &Config) -> Result<Vec<SysfsDevice>> {
    let drm_path = config.drm_class_dir();

    let entries = fs::read_dir(&drm_path).map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            Error::permission_denied(&e)
        } else {
            Error::EnumerationUnavailable {
                path: drm_path.clone(),
                source: e,
            }
        }
    })?;

    let mut cards: Vec<SysfsDevice> = entries
        .flatten()
        .map(|entry| SysfsDevice::new(entry.path()))
        .filter(is_primary_node)
        .collect();
    cards.sort_by_key(|card| (card_index(card), card.sysname()));
    Ok(cards)
}

/// Parse a hex (0x...) or decimal number
pub fn parse_hex_or_dec(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_hex_or_dec() {
        assert_eq!(parse_hex_or_dec("0x8086\n"), Some(0x8086));
        assert_eq!(parse_hex_or_dec("0X10"), Some(16));
        assert_eq!(parse_hex_or_dec("16"), Some(16));
        assert_eq!(parse_hex_or_dec("invalid"), None);
    }

    #[test]
    fn test_device_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("card0/device");
        write(&parent.join("vendor"), "0x8086\n");
        write(
            &parent.join("uevent"),
            "DRIVER=i915\nPCI_SLOT_NAME=0000:00:02.0\n",
        );
        fs::create_dir_all(dir.path().join("drivers/i915")).unwrap();
        symlink(dir.path().join("drivers/i915"), parent.join("driver")).unwrap();

        let card = SysfsDevice::new(dir.path().join("card0"));
        assert_eq!(card.sysname(), "card0");
        let parent = card.parent().unwrap();
        assert_eq!(parent.attribute("vendor").as_deref(), Some("0x8086"));
        assert_eq!(parent.attribute("enable"), None);
        assert_eq!(parent.property("PCI_SLOT_NAME").as_deref(), Some("0000:00:02.0"));
        assert_eq!(parent.driver().as_deref(), Some("i915"));
        assert!(parent.parent().is_none());
    }

    #[test]
    fn test_enumerate_primary_nodes_only() {
        let dir = tempfile::tempdir().unwrap();
        let drm = dir.path().join("class/drm");
        write(&drm.join("card1/uevent"), "DEVNAME=dri/card1\n");
        write(&drm.join("card0/uevent"), "DEVNAME=dri/card0\n");
        write(&drm.join("renderD128/uevent"), "DEVNAME=dri/renderD128\n");
        fs::create_dir_all(drm.join("card0-DP-1")).unwrap();
        fs::create_dir_all(drm.join("card2")).unwrap();
        write(&drm.join("card10/uevent"), "DEVNAME=dri/card10\n");
        write(&drm.join("version"), "drm 1.1.0\n");

        let config = Config::with_roots(dir.path(), dir.path());
        let names: Vec<_> = enumerate_drm_cards(&config)
            .unwrap()
            .iter()
            .map(SysfsDevice::sysname)
            .collect();
        assert_eq!(names, vec!["card0", "card1", "card2", "card10"]);
    }

    #[test]
    fn test_enumerate_without_drm_class() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_roots(dir.path(), dir.path());
        let err = enumerate_drm_cards(&config).unwrap_err();
        assert!(err.is_gpu_missing());
    }
}
