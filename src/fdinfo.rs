//! DRM fdinfo dispatch
//!
//! Every DRM file descriptor exposes a text record at
//! `/proc/<pid>/fdinfo/<fd>`:
//! ```text
//! drm-driver:     i915
//! drm-pdev:       0000:00:02.0
//! drm-client-id:  123
//! drm-engine-render:      12345678 ns
//! drm-engine-copy:        0 ns
//! drm-engine-video:       0 ns
//! drm-engine-video-enhance:       0 ns
//! ```
//!
//! Devices register a parser here at discovery time. The process scanner
//! offers each record to the registered parsers and calls
//! [`FdinfoRegistry::processes_done`] once a sweep is complete.

use std::io::BufRead;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::types::ProcessUsage;
use crate::vendor::{lock, GpuDevice, SharedDevice};

/// Key carrying the PCI slot of the device owning the descriptor
pub const DRM_PDEV: &str = "drm-pdev";
/// Key carrying the driver-assigned client id
pub const DRM_CLIENT_ID: &str = "drm-client-id";

/// Parser invoked for one descriptor's record on a given device
pub type FdinfoCallback<D> = fn(&mut D, &mut dyn BufRead, &mut ProcessUsage) -> bool;

type BoxedParser = Box<dyn FnMut(&mut dyn BufRead, &mut ProcessUsage) -> bool + Send>;

/// Handle returned by [`FdinfoRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParserId(usize);

impl ParserId {
    /// Registration order of this parser
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Registration {
    parse: BoxedParser,
    device: SharedDevice,
}

/// Table of per-device fdinfo parsers
#[derive(Default)]
pub struct FdinfoRegistry {
    registrations: Vec<Registration>,
}

impl FdinfoRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `parser` for `device`
    pub fn register<D>(&mut self, device: Arc<Mutex<D>>, parser: FdinfoCallback<D>) -> ParserId
    where
        D: GpuDevice + 'static,
    {
        let target = Arc::clone(&device);
        let parse: BoxedParser = Box::new(move |fdinfo, process| {
            let mut guard = lock(&target);
            parser(&mut *guard, fdinfo, process)
        });

        let id = ParserId(self.registrations.len());
        self.registrations.push(Registration {
            parse,
            device: device as SharedDevice,
        });
        id
    }

    /// Number of registered parsers
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run one registered parser on a record
    ///
    /// Returns false for an unknown id.
    pub fn parse(
        &mut self,
        id: ParserId,
        fdinfo: &mut dyn BufRead,
        process: &mut ProcessUsage,
    ) -> bool {
        match self.registrations.get_mut(id.0) {
            Some(registration) => (registration.parse)(fdinfo, process),
            None => false,
        }
    }

    /// Offer a record to every parser in registration order
    ///
    /// `process` only receives the fields of the parser that accepted the
    /// record.
    pub fn dispatch(&mut self, fdinfo: &str, process: &mut ProcessUsage) -> Option<ParserId> {
        for (index, registration) in self.registrations.iter_mut().enumerate() {
            let mut candidate = process.clone();
            let mut reader = fdinfo.as_bytes();
            if (registration.parse)(&mut reader, &mut candidate) {
                *process = candidate;
                return Some(ParserId(index));
            }
        }
        debug!("fdinfo record of pid {} matched no device", process.pid);
        None
    }

    /// Device registered under `id`
    pub fn device(&self, id: ParserId) -> Option<&SharedDevice> {
        self.registrations.get(id.0).map(|r| &r.device)
    }

    /// End of a scan cycle: let every device roll its per-process state over
    pub fn processes_done(&mut self) {
        for registration in &self.registrations {
            lock(&registration.device).refresh_running_processes();
        }
    }

    /// Drop every registration
    pub fn clear(&mut self) {
        self.registrations.clear();
    }
}

/// Split a `key: value` line, trimming both sides
pub fn extract_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Parse an engine time value like `12345 ns`
pub fn parse_engine_ns(value: &str) -> Option<u64> {
    let (number, unit) = value.split_once(' ')?;
    if unit != "ns" || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

fn peek_value<'a>(fdinfo: &'a str, wanted: &str) -> Option<&'a str> {
    fdinfo
        .lines()
        .filter_map(extract_key_value)
        .find(|(key, _)| *key == wanted)
        .map(|(_, value)| value)
}

/// Find the client id of a record without a full parse
pub fn peek_client_id(fdinfo: &str) -> Option<u32> {
    peek_value(fdinfo, DRM_CLIENT_ID).and_then(|value| value.parse().ok())
}

/// Find the bus address of the device owning a record
pub fn peek_pdev(fdinfo: &str) -> Option<&str> {
    peek_value(fdinfo, DRM_PDEV)
}
