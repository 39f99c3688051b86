//! Linux backends built on sysfs and procfs
//!
//! Devices are discovered from `/sys/class/drm`; per-process usage comes
//! from DRM fdinfo records under `/proc/<pid>/fdinfo`.

pub mod intel;
pub mod scanner;
pub mod sysfs;

pub use intel::{IntelDevice, IntelVendor};
pub use scanner::{ProcessScanner, ScannedProcess};
pub use sysfs::SysfsDevice;
