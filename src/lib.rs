//! Per-process GPU accounting from DRM fdinfo
//!
//! Attributes GPU engine busy time to individual processes and turns the
//! cumulative counters the kernel reports into busy percentages across
//! polling cycles.
//!
//! # Platform Support
//!
//! - **Linux**: Intel GPUs bound to `i915`, via sysfs and `/proc/<pid>/fdinfo`
//!
//! # Pieces
//!
//! - [`VendorRegistry`] holds one [`GpuVendor`] backend per vendor and runs
//!   discovery, refresh and shutdown over all of them
//! - [`FdinfoRegistry`] maps every discovered device to its fdinfo parser
//! - `ProcessScanner` walks `/proc` once per cycle, offers each DRM
//!   descriptor's record to the registry and then closes the cycle
//! - [`ProcessCache`] keeps each client's previous counters to derive busy
//!   percentages
//!
//! # Polling
//!
//! ```rust,no_run
//! use gpu_fdinfo_stats::{Config, FdinfoRegistry, ProcessScanner, VendorRegistry};
//! use std::time::Duration;
//!
//! let config = Config::default();
//! let mut vendors = VendorRegistry::with_default_vendors(&config);
//! let mut fdinfo = FdinfoRegistry::new();
//! let devices = vendors.discover(&mut fdinfo, None)?;
//! let scanner = ProcessScanner::new(&config);
//!
//! for _ in 0..5 {
//!     vendors.refresh(&devices);
//!     for client in scanner.sweep(&mut fdinfo) {
//!         println!("{} (PID {}): {:?}%", client.name, client.usage.pid, client.usage.gpu_usage);
//!     }
//!     std::thread::sleep(Duration::from_secs(1));
//! }
//!
//! vendors.shutdown();
//! # Ok::<(), gpu_fdinfo_stats::Error>(())
//! ```
//!
//! # Permissions
//!
//! fdinfo records of other users' processes are only readable as root.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod error;
pub mod fdinfo;
pub mod types;
pub mod vendor;

#[cfg(target_os = "linux")]
pub mod linux;

// Re-export main types at crate root
pub use cache::ProcessCache;
pub use config::Config;
pub use error::{CacheError, Error, Result};
pub use fdinfo::{FdinfoRegistry, ParserId};
pub use types::*;
pub use vendor::{GpuDevice, GpuVendor, SharedDevice, VendorRegistry};

#[cfg(target_os = "linux")]
pub use linux::{IntelDevice, IntelVendor, ProcessScanner, ScannedProcess};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if the current platform is supported
pub fn is_platform_supported() -> bool {
    cfg!(target_os = "linux")
}
