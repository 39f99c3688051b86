//! Vendor backends and their registry
//!
//! Each GPU vendor implements [`GpuVendor`]. The top level drives discovery,
//! refresh and shutdown through a [`VendorRegistry`] without knowing which
//! vendors are present.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fdinfo::FdinfoRegistry;
use crate::types::{DynamicInfo, StaticInfo};

/// A discovered GPU
pub trait GpuDevice: Send + Debug {
    /// Information gathered once at discovery
    fn static_info(&self) -> &StaticInfo;

    /// Sensor values from the last refresh
    fn dynamic_info(&self) -> &DynamicInfo;

    /// Fill in [`StaticInfo`]
    fn populate_static_info(&mut self);

    /// Re-read device sensors into [`DynamicInfo`]
    fn refresh_dynamic_info(&mut self);

    /// Close the current polling cycle of per-process accounting
    fn refresh_running_processes(&mut self);
}

/// A device shared between its backend, the fdinfo registry and the caller
pub type SharedDevice = Arc<Mutex<dyn GpuDevice>>;

/// Lock a device, recovering the data of a poisoned mutex
pub(crate) fn lock<T: ?Sized>(device: &Mutex<T>) -> MutexGuard<'_, T> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capability set of one GPU vendor
pub trait GpuVendor: Send {
    /// Vendor display name
    fn name(&self) -> &'static str;

    /// Prepare the backend; false if it cannot be used at all
    fn init(&mut self) -> bool;

    /// Release everything acquired by the backend
    fn shutdown(&mut self);

    /// Description of the last failure
    fn last_error_string(&self) -> String;

    /// Discover this vendor's devices and register their fdinfo parsers
    ///
    /// With a `mask`, the `i`-th accepted device is kept only when bit `i`
    /// is set.
    fn get_device_handles(
        &mut self,
        fdinfo: &mut FdinfoRegistry,
        mask: Option<u64>,
    ) -> Result<Vec<SharedDevice>>;

    /// Fill in static information of a device
    fn populate_static_info(&self, device: &SharedDevice) {
        lock(device).populate_static_info();
    }

    /// Refresh sensor values of a device
    fn refresh_dynamic_info(&self, device: &SharedDevice) {
        lock(device).refresh_dynamic_info();
    }

    /// Close the per-process accounting cycle of a device
    fn refresh_running_processes(&self, device: &SharedDevice) {
        lock(device).refresh_running_processes();
    }
}

/// Process-wide list of vendor backends
#[derive(Default)]
pub struct VendorRegistry {
    vendors: Vec<Box<dyn GpuVendor>>,
    init_failures: Vec<Error>,
}

impl VendorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in backend
    ///
    /// Backends are registered whether or not their hardware is present.
    pub fn with_default_vendors(config: &Config) -> Self {
        let mut registry = Self::new();
        #[cfg(target_os = "linux")]
        registry.register(Box::new(crate::linux::intel::IntelVendor::new(config)));
        #[cfg(not(target_os = "linux"))]
        let _ = config;
        registry
    }

    /// Add a backend
    pub fn register(&mut self, vendor: Box<dyn GpuVendor>) {
        debug!("Registered GPU vendor {}", vendor.name());
        self.vendors.push(vendor);
    }

    /// Names of the registered backends
    pub fn vendor_names(&self) -> Vec<&'static str> {
        self.vendors.iter().map(|v| v.name()).collect()
    }

    /// Backends whose `init` failed during the last discovery
    pub fn init_failures(&self) -> &[Error] {
        &self.init_failures
    }

    /// Discover devices of every backend
    ///
    /// Backends that fail to initialize or find nothing are skipped. Static
    /// information is populated for every returned device.
    pub fn discover(
        &mut self,
        fdinfo: &mut FdinfoRegistry,
        mask: Option<u64>,
    ) -> Result<Vec<SharedDevice>> {
        let mut devices = Vec::new();
        self.init_failures.clear();

        for vendor in &mut self.vendors {
            if !vendor.init() {
                let err = Error::InitFailed {
                    vendor: vendor.name(),
                    message: vendor.last_error_string(),
                };
                warn!("{}", err);
                self.init_failures.push(err);
                continue;
            }

            match vendor.get_device_handles(fdinfo, mask) {
                Ok(found) => {
                    for device in &found {
                        vendor.populate_static_info(device);
                    }
                    debug!("{} backend found {} device(s)", vendor.name(), found.len());
                    devices.extend(found);
                }
                Err(e) if e.is_gpu_missing() => {
                    debug!("{} backend: {}", vendor.name(), e);
                }
                Err(e) => {
                    warn!("{} backend discovery failed: {}", vendor.name(), e);
                }
            }
        }

        if devices.is_empty() {
            return Err(Error::NoGpuFound { vendor: "supported" });
        }
        Ok(devices)
    }

    /// Refresh sensor values of every device
    pub fn refresh(&self, devices: &[SharedDevice]) {
        for device in devices {
            lock(device).refresh_dynamic_info();
        }
    }

    /// Shut down every backend
    pub fn shutdown(&mut self) {
        for vendor in &mut self.vendors {
            vendor.shutdown();
        }
    }
}
