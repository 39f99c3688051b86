//! Intel backend (i915)
//!
//! Devices are the enabled PCI devices of vendor `0x8086` bound to `i915`.
//! Per-process usage comes from the driver's fdinfo engine counters:
//! ```text
//! drm-pdev:       0000:00:02.0
//! drm-client-id:  7
//! drm-engine-render:      1000000 ns
//! drm-engine-copy:        0 ns
//! drm-engine-video:       0 ns
//! drm-engine-video-enhance:       0 ns
//! ```

use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, error};

use crate::cache::ProcessCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fdinfo::{
    extract_key_value, parse_engine_ns, FdinfoRegistry, DRM_CLIENT_ID, DRM_PDEV,
};
use crate::linux::sysfs::{enumerate_drm_cards, parse_hex_or_dec, SysfsDevice};
use crate::types::{
    ClientKey, DynamicInfo, EngineClass, EngineTimes, ProcessUsage, StaticInfo,
    INTEGRATED_GPU_PCI_SLOT,
};
use crate::vendor::{GpuDevice, GpuVendor, SharedDevice};

/// Intel PCI vendor ID
pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// Kernel driver handled by this backend
pub const I915_DRIVER: &str = "i915";

/// Longest bus address kept for a device
pub const PDEV_LEN: usize = 16;

const DRM_INTEL_RENDER: &str = "drm-engine-render";
const DRM_INTEL_COPY: &str = "drm-engine-copy";
const DRM_INTEL_VIDEO: &str = "drm-engine-video";
const DRM_INTEL_VIDEO_ENHANCE: &str = "drm-engine-video-enhance";

fn engine_class_for_key(key: &str) -> Option<EngineClass> {
    match key {
        DRM_INTEL_RENDER => Some(EngineClass::Render),
        DRM_INTEL_COPY => Some(EngineClass::Copy),
        DRM_INTEL_VIDEO => Some(EngineClass::Video),
        DRM_INTEL_VIDEO_ENHANCE => Some(EngineClass::VideoEnhance),
        _ => None,
    }
}

/// One Intel GPU
#[derive(Debug)]
pub struct IntelDevice {
    card_device: SysfsDevice,
    card_parent: SysfsDevice,
    pdev: String,
    static_info: StaticInfo,
    dynamic_info: DynamicInfo,
    cache: ProcessCache,
    line: String,
}

impl IntelDevice {
    /// Build a device from a DRM card if its parent matches
    ///
    /// Returns `Ok(None)` for cards of another vendor or driver, or
    /// disabled ones. A matching card without `PCI_SLOT_NAME` is an error.
    pub fn probe(card: SysfsDevice, vendor_id: u16, driver: &str) -> Result<Option<Self>> {
        let Some(parent) = card.parent() else {
            return Ok(None);
        };

        let vendor_matches = parent
            .attribute("vendor")
            .and_then(|v| parse_hex_or_dec(&v))
            == Some(u64::from(vendor_id));
        let driver_matches = parent.driver().as_deref() == Some(driver);
        let enabled = parent.attribute("enable").as_deref() == Some("1");
        if !(vendor_matches && driver_matches && enabled) {
            return Ok(None);
        }

        let slot = parent
            .property("PCI_SLOT_NAME")
            .ok_or_else(|| Error::MissingProperty {
                path: parent.path().to_path_buf(),
                property: "PCI_SLOT_NAME",
            })?;
        let pdev: String = slot.chars().take(PDEV_LEN).collect();

        Ok(Some(Self {
            card_device: card,
            card_parent: parent,
            pdev,
            static_info: StaticInfo::default(),
            dynamic_info: DynamicInfo::default(),
            cache: ProcessCache::new(),
            line: String::new(),
        }))
    }

    /// PCI bus address of this device
    pub fn pdev(&self) -> &str {
        &self.pdev
    }

    /// DRM card directory
    pub fn card_device(&self) -> &SysfsDevice {
        &self.card_device
    }

    /// Per-client counter cache
    pub fn cache(&self) -> &ProcessCache {
        &self.cache
    }

    /// Parse one fdinfo record, stamping the sample with the current time
    pub fn parse_fdinfo(&mut self, fdinfo: &mut dyn BufRead, process: &mut ProcessUsage) -> bool {
        self.parse_fdinfo_at(fdinfo, process, Instant::now())
    }

    /// Parse one fdinfo record sampled at `now`
    ///
    /// Returns false when the record belongs to another device or has no
    /// client id; nothing is changed in that case. Malformed engine values
    /// are skipped.
    pub fn parse_fdinfo_at(
        &mut self,
        fdinfo: &mut dyn BufRead,
        process: &mut ProcessUsage,
        now: Instant,
    ) -> bool {
        let mut client_id = None;
        let mut engines = EngineTimes::default();

        loop {
            self.line.clear();
            match fdinfo.read_line(&mut self.line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("fdinfo read of pid {} stopped: {}", process.pid, e);
                    break;
                }
            }

            let Some((key, value)) = extract_key_value(&self.line) else {
                continue;
            };

            match key {
                DRM_PDEV => {
                    if value != self.pdev {
                        return false;
                    }
                }
                DRM_CLIENT_ID => {
                    if let Ok(id) = value.parse::<u32>() {
                        client_id = Some(id);
                    }
                }
                _ => {
                    if let Some(class) = engine_class_for_key(key) {
                        if let Some(ns) = parse_engine_ns(value) {
                            engines.set(class, ns);
                        }
                    }
                }
            }
        }

        let Some(client_id) = client_id else {
            return false;
        };

        // Copy engine time only lives in the cache
        if let Some(ns) = engines.get(EngineClass::Render) {
            process.gfx_engine_used = Some(ns);
        }
        // Video/VideoEnhance as decode/encode is a best guess
        if let Some(ns) = engines.get(EngineClass::Video) {
            process.dec_engine_used = Some(ns);
        }
        if let Some(ns) = engines.get(EngineClass::VideoEnhance) {
            process.enc_engine_used = Some(ns);
        }

        let key = ClientKey::new(client_id, process.pid);
        // A rejected duplicate is logged by the cache; the record still parsed
        let _ = self.cache.update(key, &engines, now, process);
        true
    }

    fn read_mhz(&self, attribute: &str) -> Option<u32> {
        self.card_device
            .attribute(attribute)
            .and_then(|v| v.parse().ok())
    }
}

impl GpuDevice for IntelDevice {
    fn static_info(&self) -> &StaticInfo {
        &self.static_info
    }

    fn dynamic_info(&self) -> &DynamicInfo {
        &self.dynamic_info
    }

    fn populate_static_info(&mut self) {
        self.static_info.device_name = self.card_parent.property("ID_MODEL_FROM_DATABASE");
        self.static_info.pdev = Some(self.pdev.clone());
        self.static_info.integrated_graphics = Some(self.pdev == INTEGRATED_GPU_PCI_SLOT);
    }

    fn refresh_dynamic_info(&mut self) {
        // Memory clock attributes only exist on some discrete cards
        self.dynamic_info = DynamicInfo {
            gpu_clock_speed: self.read_mhz("gt_cur_freq_mhz"),
            gpu_clock_speed_max: self.read_mhz("gt_max_freq_mhz"),
            mem_clock_speed: self.read_mhz("mem_cur_freq_mhz"),
            mem_clock_speed_max: self.read_mhz("mem_max_freq_mhz"),
        };
    }

    fn refresh_running_processes(&mut self) {
        self.cache.swap();
    }
}

/// Intel vendor backend
pub struct IntelVendor {
    config: Config,
    devices: Vec<Arc<Mutex<IntelDevice>>>,
    last_error: Option<String>,
}

impl IntelVendor {
    /// Create the backend; nothing is touched until discovery
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            devices: Vec::new(),
            last_error: None,
        }
    }

    /// Devices found by the last discovery
    pub fn devices(&self) -> &[Arc<Mutex<IntelDevice>>] {
        &self.devices
    }
}

impl GpuVendor for IntelVendor {
    fn name(&self) -> &'static str {
        "Intel"
    }

    fn init(&mut self) -> bool {
        true
    }

    fn shutdown(&mut self) {
        self.devices.clear();
    }

    fn last_error_string(&self) -> String {
        self.last_error.clone().unwrap_or_else(|| "Err".to_string())
    }

    fn get_device_handles(
        &mut self,
        fdinfo: &mut FdinfoRegistry,
        mask: Option<u64>,
    ) -> Result<Vec<SharedDevice>> {
        let cards = enumerate_drm_cards(&self.config).map_err(|e| {
            self.last_error = Some(e.to_string());
            e
        })?;

        let mut handles: Vec<SharedDevice> = Vec::new();
        let mut accepted = 0usize;

        for card in cards {
            let device = match IntelDevice::probe(card, INTEL_VENDOR_ID, I915_DRIVER) {
                Ok(Some(device)) => device,
                Ok(None) => continue,
                Err(e) => {
                    error!("Skipping Intel GPU: {}", e);
                    self.last_error = Some(e.to_string());
                    continue;
                }
            };

            let index = accepted;
            accepted += 1;
            if let Some(mask) = mask {
                if index >= 64 || mask & (1u64 << index) == 0 {
                    debug!("Intel GPU {} masked out", device.pdev);
                    continue;
                }
            }

            let device = Arc::new(Mutex::new(device));
            fdinfo.register(Arc::clone(&device), IntelDevice::parse_fdinfo);
            self.devices.push(Arc::clone(&device));
            handles.push(device as SharedDevice);
        }

        if handles.is_empty() {
            return Err(Error::NoGpuFound { vendor: "Intel" });
        }
        Ok(handles)
    }
}
