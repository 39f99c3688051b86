//! /proc sweep feeding fdinfo records to the registered parsers
//!
//! A process using the GPU holds file descriptors to `/dev/dri/cardN` or
//! `/dev/dri/renderD*`. Each of them has an fdinfo record; descriptors
//! duplicated with `dup()` share a DRM client and report the same client
//! id, so only the first accepted record per device and client id is used.
//! Client ids are only unique per device.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use libc::pid_t;
use log::warn;

use crate::config::Config;
use crate::fdinfo::{peek_client_id, peek_pdev, FdinfoRegistry, ParserId};
use crate::types::ProcessUsage;

/// GPU usage of one DRM client found during a sweep
#[derive(Debug, Clone)]
pub struct ScannedProcess {
    /// Parser (and so device) that accepted the record
    pub parser: ParserId,
    /// Process name
    pub name: String,
    /// Usage reported for this client
    pub usage: ProcessUsage,
}

/// Walks procfs once per polling cycle
#[derive(Debug, Clone)]
pub struct ProcessScanner {
    proc_root: PathBuf,
}

impl ProcessScanner {
    /// Create a scanner for the configured procfs
    pub fn new(config: &Config) -> Self {
        Self {
            proc_root: config.proc_root.clone(),
        }
    }

    /// Run one polling cycle
    ///
    /// Every DRM descriptor of every process is offered to `registry`;
    /// [`FdinfoRegistry::processes_done`] is called once all of them were
    /// seen. Results are sorted by pid.
    pub fn sweep(&self, registry: &mut FdinfoRegistry) -> Vec<ScannedProcess> {
        let mut clients = Vec::new();

        match fs::read_dir(&self.proc_root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    // Only process numeric directories (PIDs)
                    let Ok(pid) = entry.file_name().to_string_lossy().parse::<pid_t>() else {
                        continue;
                    };
                    self.scan_process(pid, registry, &mut clients);
                }
            }
            Err(e) => warn!("Cannot list {}: {}", self.proc_root.display(), e),
        }

        registry.processes_done();
        clients.sort_by_key(|c: &ScannedProcess| c.usage.pid);
        clients
    }

    fn scan_process(
        &self,
        pid: pid_t,
        registry: &mut FdinfoRegistry,
        clients: &mut Vec<ScannedProcess>,
    ) {
        let process_dir = self.proc_root.join(pid.to_string());
        let Ok(fd_entries) = fs::read_dir(process_dir.join("fd")) else {
            return;
        };

        let mut seen_clients: HashSet<(Option<String>, u32)> = HashSet::new();
        let mut name = None;

        for fd_entry in fd_entries.flatten() {
            if !is_drm_fd(&fd_entry.path()) {
                continue;
            }

            let fdinfo_path = process_dir.join("fdinfo").join(fd_entry.file_name());
            let Ok(record) = fs::read_to_string(&fdinfo_path) else {
                continue;
            };

            let client = peek_client_id(&record)
                .map(|id| (peek_pdev(&record).map(str::to_string), id));
            if client.as_ref().is_some_and(|c| seen_clients.contains(c)) {
                continue;
            }

            let mut usage = ProcessUsage::new(pid);
            if let Some(parser) = registry.dispatch(&record, &mut usage) {
                if let Some(client) = client {
                    seen_clients.insert(client);
                }
                let name = name
                    .get_or_insert_with(|| get_process_name(&process_dir, pid))
                    .clone();
                clients.push(ScannedProcess {
                    parser,
                    name,
                    usage,
                });
            }
        }
    }
}

/// Check if a `/proc/<pid>/fd/<n>` link points to a DRM node
fn is_drm_fd(link_path: &Path) -> bool {
    if let Ok(target) = fs::read_link(link_path) {
        let target_str = target.to_string_lossy();
        target_str.starts_with("/dev/dri/renderD") || target_str.starts_with("/dev/dri/card")
    } else {
        false
    }
}

/// Get the process name from /proc/<pid>/comm
fn get_process_name(process_dir: &Path, pid: pid_t) -> String {
    fs::read_to_string(process_dir.join("comm"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| format!("pid:{}", pid))
}
