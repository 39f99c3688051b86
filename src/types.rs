//! Data types for per-process GPU accounting
//!
//! Records built from partially-available telemetry keep one `Option` per
//! field: a value is meaningful only when it is `Some`.

use libc::pid_t;
use serde::Serialize;

/// Bus address of the integrated Intel GPU; discrete cards sit elsewhere
pub const INTEGRATED_GPU_PCI_SLOT: &str = "0000:00:02.0";

/// Engine classes reported in DRM fdinfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum EngineClass {
    /// Render/3D engine
    Render = 0,
    /// Copy/Blitter engine
    Copy = 1,
    /// Video decode engine
    Video = 2,
    /// Video enhance/encode engine
    VideoEnhance = 3,
}

impl EngineClass {
    fn slot(self) -> usize {
        self as usize
    }
}

/// Cumulative busy time per engine class, in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineTimes {
    slots: [Option<u64>; 4],
}

impl EngineTimes {
    /// Busy time of one engine class, if it was sampled
    pub fn get(&self, class: EngineClass) -> Option<u64> {
        self.slots[class.slot()]
    }

    /// Record the busy time of one engine class
    pub fn set(&mut self, class: EngineClass, ns: u64) {
        self.slots[class.slot()] = Some(ns);
    }

    /// Returns true if no engine class was sampled
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Identity of one DRM client across polling cycles
///
/// The kernel hands out one client id per open GPU context, so a single
/// process can own several keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClientKey {
    /// Driver-assigned DRM client id
    pub client_id: u32,
    /// Owning process
    pub pid: pid_t,
}

impl ClientKey {
    /// Create a new ClientKey
    pub fn new(client_id: u32, pid: pid_t) -> Self {
        Self { client_id, pid }
    }
}

/// GPU usage of one process on one device, rebuilt every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessUsage {
    /// Process id
    pub pid: pid_t,
    /// Cumulative render engine time (ns)
    pub gfx_engine_used: Option<u64>,
    /// Cumulative video decode engine time (ns)
    pub dec_engine_used: Option<u64>,
    /// Cumulative video encode engine time (ns)
    pub enc_engine_used: Option<u64>,
    /// Render engine busy percentage since the previous cycle
    pub gpu_usage: Option<u32>,
    /// Decode engine busy percentage since the previous cycle
    pub decode_usage: Option<u32>,
    /// Encode engine busy percentage since the previous cycle
    pub encode_usage: Option<u32>,
}

impl ProcessUsage {
    /// Create an empty usage record for a process
    pub fn new(pid: pid_t) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }
}

/// Device information that does not change after discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StaticInfo {
    /// Human readable model name
    pub device_name: Option<String>,
    /// PCI bus address
    pub pdev: Option<String>,
    /// Whether this is the integrated GPU
    pub integrated_graphics: Option<bool>,
}

/// Device sensors refreshed every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DynamicInfo {
    /// Current GPU core clock (MHz)
    pub gpu_clock_speed: Option<u32>,
    /// Maximum GPU core clock (MHz)
    pub gpu_clock_speed_max: Option<u32>,
    /// Current memory clock (MHz)
    pub mem_clock_speed: Option<u32>,
    /// Maximum memory clock (MHz)
    pub mem_clock_speed_max: Option<u32>,
}

/// Device utilization as the sum of its processes' render usage
///
/// Returns `None` when no process carries a usage value.
pub fn aggregate_gpu_usage<'a>(processes: impl IntoIterator<Item = &'a ProcessUsage>) -> Option<u32> {
    processes
        .into_iter()
        .filter_map(|p| p.gpu_usage)
        .fold(None, |acc: Option<u32>, usage| {
            Some(acc.unwrap_or(0).saturating_add(usage))
        })
        .map(|total| total.min(100))
}
