//! Full discovery → parse → swap cycles against fixture sysfs/procfs trees

#![cfg(target_os = "linux")]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::time::{Duration, Instant};

use gpu_fdinfo_stats::{
    aggregate_gpu_usage, Config, FdinfoRegistry, GpuVendor, IntelVendor, ProcessScanner, ProcessUsage,
    VendorRegistry,
};

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn add_intel_card(sys: &Path, card: &str, slot: &str) {
    let card_dir = sys.join("class/drm").join(card);
    write(&card_dir.join("uevent"), &format!("DEVNAME=dri/{}\n", card));
    write(&card_dir.join("gt_cur_freq_mhz"), "300\n");
    let parent = card_dir.join("device");
    write(&parent.join("vendor"), "0x8086\n");
    write(&parent.join("enable"), "1\n");
    write(&parent.join("uevent"), &format!("DRIVER=i915\nPCI_SLOT_NAME={}\n", slot));
    let driver = sys.join("bus/pci/drivers/i915");
    fs::create_dir_all(&driver).unwrap();
    symlink(&driver, parent.join("driver")).unwrap();
}

fn add_drm_fd(proc_root: &Path, pid: i32, fd: u32, record: &str) {
    let process_dir = proc_root.join(pid.to_string());
    fs::create_dir_all(process_dir.join("fd")).unwrap();
    symlink("/dev/dri/renderD128", process_dir.join("fd").join(fd.to_string())).unwrap();
    write(&process_dir.join("fdinfo").join(fd.to_string()), record);
    write(&process_dir.join("comm"), "glxgears\n");
}

#[test]
fn discovery_and_three_cycles() {
    let sys = tempfile::tempdir().unwrap();
    let proc_dir = tempfile::tempdir().unwrap();
    add_intel_card(sys.path(), "card0", "0000:00:02.0");
    let config = Config::with_roots(sys.path(), proc_dir.path());

    let record = "drm-pdev: 0000:00:02.0\ndrm-client-id: 7\ndrm-engine-render: 1000000 ns\n";
    add_drm_fd(proc_dir.path(), 4242, 3, record);

    let mut vendors = VendorRegistry::with_default_vendors(&config);
    let mut fdinfo = FdinfoRegistry::new();
    let devices = vendors.discover(&mut fdinfo, None).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(fdinfo.len(), 1);

    vendors.refresh(&devices);
    {
        let device = devices[0].lock().unwrap();
        assert_eq!(device.static_info().integrated_graphics, Some(true));
        assert_eq!(device.dynamic_info().gpu_clock_speed, Some(300));
    }

    let scanner = ProcessScanner::new(&config);

    // first sighting: counters but no percentage
    let clients = scanner.sweep(&mut fdinfo);
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, "glxgears");
    assert_eq!(clients[0].usage.gfx_engine_used, Some(1_000_000));
    assert_eq!(clients[0].usage.gpu_usage, None);

    // unchanged counter over a non-zero interval
    let clients = scanner.sweep(&mut fdinfo);
    assert_eq!(clients[0].usage.gpu_usage, Some(0));
    let usages: Vec<&ProcessUsage> = clients.iter().map(|c| &c.usage).collect();
    assert_eq!(aggregate_gpu_usage(usages), Some(0));

    // process exits
    fs::remove_dir_all(proc_dir.path().join("4242")).unwrap();
    assert!(scanner.sweep(&mut fdinfo).is_empty());

    vendors.shutdown();
}

#[test]
fn busy_percentage_between_two_samples() {
    let sys = tempfile::tempdir().unwrap();
    add_intel_card(sys.path(), "card0", "0000:00:02.0");
    let config = Config::with_roots(sys.path(), sys.path());

    let mut intel = IntelVendor::new(&config);
    let mut fdinfo = FdinfoRegistry::new();
    intel.get_device_handles(&mut fdinfo, None).unwrap();
    let device = &intel.devices()[0];
    let t0 = Instant::now();

    let first = "drm-pdev: 0000:00:02.0\ndrm-client-id: 7\ndrm-engine-render: 1000000 ns\n";
    let mut usage = ProcessUsage::new(100);
    assert!(device
        .lock()
        .unwrap()
        .parse_fdinfo_at(&mut first.as_bytes(), &mut usage, t0));
    assert_eq!(usage.gpu_usage, None);
    fdinfo.processes_done();

    let second = "drm-pdev: 0000:00:02.0\ndrm-client-id: 7\ndrm-engine-render: 51000000 ns\n";
    let mut usage = ProcessUsage::new(100);
    assert!(device.lock().unwrap().parse_fdinfo_at(
        &mut second.as_bytes(),
        &mut usage,
        t0 + Duration::from_millis(500)
    ));
    assert_eq!(usage.gpu_usage, Some(10));
}

#[test]
fn foreign_and_anonymous_records_are_rejected() {
    let sys = tempfile::tempdir().unwrap();
    add_intel_card(sys.path(), "card0", "0000:00:02.0");
    let config = Config::with_roots(sys.path(), sys.path());

    let mut intel = IntelVendor::new(&config);
    let mut fdinfo = FdinfoRegistry::new();
    intel.get_device_handles(&mut fdinfo, None).unwrap();

    let mut usage = ProcessUsage::new(1);
    let foreign = "drm-pdev: 0000:01:00.0\ndrm-client-id: 7\ndrm-engine-render: 10 ns\n";
    assert_eq!(fdinfo.dispatch(foreign, &mut usage), None);

    let anonymous = "drm-pdev: 0000:00:02.0\ndrm-engine-render: 10 ns\n";
    assert_eq!(fdinfo.dispatch(anonymous, &mut usage), None);
    assert_eq!(usage, ProcessUsage::new(1));

    let cache_len = {
        let device = intel.devices()[0].lock().unwrap();
        device.cache().current_len() + device.cache().previous_len()
    };
    assert_eq!(cache_len, 0);
}

#[test]
fn no_gpu_is_an_error_not_a_panic() {
    let sys = tempfile::tempdir().unwrap();
    let config = Config::with_roots(sys.path(), sys.path());
    let mut vendors = VendorRegistry::with_default_vendors(&config);
    let mut fdinfo = FdinfoRegistry::new();
    let err = vendors.discover(&mut fdinfo, None).unwrap_err();
    assert!(err.is_gpu_missing());
}
