//! Integration tests for instance lifecycle (release, sweep, list, summary).

use chrono::Utc;
use emuport::{
    AllocationRequest, AllocationResult, EmulatorPid, InstanceId, InstanceRelease, InstanceStatus,
    PortRequest, ServiceKind, Store,
};
use emuport_test_utils::Harness;

fn id(s: &str) -> InstanceId {
    InstanceId::parse(s).unwrap()
}

// ============================================================================
// RELEASE
// ============================================================================

#[test]
fn dropped_guard_releases_allocation() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);

    {
        let guard = rt
            .allocate(&AllocationRequest::new(id("scoped")).with_vnc(PortRequest::Auto))
            .unwrap();
        assert_eq!(guard.descriptor().allocated_ports.len(), 2);
    }

    assert!(h.locked_ports().is_empty());
    assert!(rt.list_instances().unwrap().is_empty());
}

#[test]
fn release_by_other_live_process_is_noop() {
    let h = Harness::filesystem();
    let owner = h.runtime(100);
    let other = h.runtime(200);
    owner
        .allocate(&AllocationRequest::new(id("mine")))
        .unwrap()
        .into_inner();

    assert_eq!(
        other.release_instance(&id("mine")).unwrap(),
        InstanceRelease::HeldByOther { owner_pid: 100 }
    );
    assert_eq!(h.locked_ports(), vec![2222]);
}

#[test]
fn supervisor_process_may_release_menu_allocation() {
    let h = Harness::filesystem();
    let menu = h.runtime(100);
    let launcher = h.runtime(200);

    menu.allocate(&AllocationRequest::new(id("handed-over")))
        .unwrap()
        .into_inner();
    launcher
        .supervisor(&id("handed-over"))
        .unwrap()
        .adopt(5000)
        .unwrap();

    assert!(matches!(
        launcher.release_instance(&id("handed-over")).unwrap(),
        InstanceRelease::Released { .. }
    ));
    assert!(h.locked_ports().is_empty());
}

#[test]
fn release_removes_handoff_file() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);
    let guard = rt.allocate(&AllocationRequest::new(id("handoff"))).unwrap();

    let path = rt.write_handoff(&guard.result()).unwrap();
    assert_eq!(
        AllocationResult::read_from(&path).unwrap().ssh_port,
        guard.descriptor().ssh_port
    );

    guard.release().unwrap();
    assert!(!path.exists());
}

// ============================================================================
// STATUS
// ============================================================================

#[test]
fn status_follows_process_liveness() {
    let h = Harness::filesystem();
    let menu = h.runtime(100);
    let launcher = h.runtime(200);
    menu.allocate(&AllocationRequest::new(id("vm")))
        .unwrap()
        .into_inner();

    let status = |rt: &emuport::EmuportRuntime| rt.get(&id("vm")).unwrap().unwrap().status;
    assert_eq!(status(&menu), InstanceStatus::Starting);

    h.liveness.start(5000);
    launcher.supervisor(&id("vm")).unwrap().adopt(5000).unwrap();
    assert_eq!(status(&menu), InstanceStatus::Running);

    // The menu may exit while the emulator keeps running
    h.liveness.kill(100);
    assert_eq!(status(&launcher), InstanceStatus::Running);

    h.liveness.kill(5000);
    assert_eq!(status(&launcher), InstanceStatus::Stopped);
}

// ============================================================================
// SWEEP
// ============================================================================

#[test]
fn killed_emulator_is_swept_and_neighbour_survives() {
    let h = Harness::filesystem();
    let launcher_a = h.runtime(100);
    let launcher_b = h.runtime(200);

    let a = launcher_a
        .allocate(&AllocationRequest::new(id("a")).with_vnc(PortRequest::Auto))
        .unwrap()
        .commit();
    let b = launcher_b
        .allocate(&AllocationRequest::new(id("b")))
        .unwrap()
        .commit();
    h.liveness.start(5001);
    h.liveness.start(5002);
    a.adopt(5001).unwrap();
    b.adopt(5002).unwrap();

    // Emulator and launcher of `a` die without cleaning up
    h.liveness.kill(5001);
    h.liveness.kill(100);

    let report = launcher_b.sweep().unwrap();
    assert_eq!(report.reclaimed_instances, vec![id("a")]);
    assert_eq!(report.count(), 1);

    let remaining = launcher_b.list_instances().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].instance_id, id("b"));
    assert_eq!(remaining[0].status, InstanceStatus::Running);
    assert_eq!(h.locked_ports(), vec![2223]);

    // Freed ports are allocatable again
    let c = launcher_b
        .allocate(&AllocationRequest::new(id("c")))
        .unwrap()
        .into_inner();
    assert_eq!(c.ssh_port, 2222);
}

#[test]
fn pending_instance_with_live_owner_is_kept() {
    let h = Harness::memory();
    let rt = h.runtime(100);
    rt.allocate(&AllocationRequest::new(id("starting")))
        .unwrap()
        .into_inner();

    assert!(h.runtime(200).sweep().unwrap().is_empty());
    assert_eq!(h.locked_ports(), vec![2222]);
}

#[test]
fn expired_instance_is_reclaimed_even_with_live_emulator() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);
    let mut d = rt
        .allocate(&AllocationRequest::new(id("ancient")))
        .unwrap()
        .into_inner();

    h.liveness.start(5000);
    d.emulator_pid = EmulatorPid::Running(5000);
    d.created_at = Utc::now() - chrono::Duration::hours(2);
    h.store().write_instance(&d).unwrap();

    let report = h.runtime(200).sweep().unwrap();
    assert_eq!(report.reclaimed_instances, vec![id("ancient")]);
    assert!(h.locked_ports().is_empty());
}

#[test]
fn sweep_is_idempotent() {
    let h = Harness::filesystem();
    h.runtime(100)
        .allocate(&AllocationRequest::new(id("gone")))
        .unwrap()
        .into_inner();
    h.liveness.kill(100);

    let rt = h.runtime(200);
    assert_eq!(rt.sweep().unwrap().count(), 1);
    assert!(rt.sweep().unwrap().is_empty());
}

#[test]
fn sweep_prunes_idle_instance_arbiters() {
    let h = Harness::filesystem();
    let mut options = h.options();
    options.retention_secs = 0;
    let locks_dir = options.layout().locks_dir();
    let rt = h.runtime_with(100, options);

    for n in 0..20 {
        let name = format!("cycle-{n}");
        rt.allocate(&AllocationRequest::new(id(&name)))
            .unwrap()
            .release()
            .unwrap();
    }

    let arbiters = || {
        std::fs::read_dir(&locks_dir)
            .unwrap()
            .flatten()
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("instance-") && name.ends_with(".lock")
            })
            .count()
    };
    assert_eq!(arbiters(), 20);

    let report = rt.sweep().unwrap();
    assert_eq!(report.pruned_arbiters.len(), 20);
    assert!(report.is_empty());
    assert_eq!(arbiters(), 0);

    // A pruned key is recreated on next use
    let d = rt
        .allocate(&AllocationRequest::new(id("cycle-0")))
        .unwrap()
        .into_inner();
    assert_eq!(d.ssh_port, 2222);
}

// ============================================================================
// SUMMARY
// ============================================================================

#[test]
fn usage_summary_counts_live_allocations() {
    let h = Harness::filesystem();
    let mut options = h.options();
    options.max_instances = 10;
    let rt = h.runtime_with(100, options);

    rt.allocate(
        &AllocationRequest::new(id("a"))
            .with_vnc(PortRequest::Auto)
            .with_wayvnc(PortRequest::Auto),
    )
    .unwrap()
    .into_inner();
    rt.allocate(&AllocationRequest::new(id("b")).with_vnc(PortRequest::Auto))
        .unwrap()
        .into_inner();

    let summary = rt.port_usage_summary().unwrap();
    assert_eq!(summary.instances, 2);
    assert_eq!(summary.locks_held, 5);
    assert_eq!(summary.active(ServiceKind::Ssh), 2);
    assert_eq!(summary.active(ServiceKind::Vnc), 2);
    assert_eq!(summary.active(ServiceKind::WayVnc), 1);
    assert_eq!(summary.active(ServiceKind::Rdp), 0);

    let wayvnc = summary
        .services
        .iter()
        .find(|usage| usage.service == ServiceKind::WayVnc)
        .unwrap();
    assert_eq!((wayvnc.range_start, wayvnc.range_end), (5901, 5910));
}
