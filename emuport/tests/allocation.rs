//! Integration tests for port allocation across cooperating processes.
//!
//! Each runtime created from a harness acts as a separate process (its own
//! pid) sharing one store.

use std::collections::BTreeSet;

use emuport::{AllocationRequest, EmuportError, InstanceId, PortRequest, ServiceKind, Store};
use emuport_test_utils::Harness;

fn id(s: &str) -> InstanceId {
    InstanceId::parse(s).unwrap()
}

fn full(name: &str) -> AllocationRequest {
    AllocationRequest::new(id(name))
        .with_vnc(PortRequest::Auto)
        .with_rdp(PortRequest::Auto)
        .with_wayvnc(PortRequest::Auto)
}

// ============================================================================
// AUTO-ALLOCATION
// ============================================================================

#[test]
fn auto_allocation_starts_at_base_ports() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);

    let first = rt.allocate(&full("first")).unwrap().into_inner();
    assert_eq!(first.ssh_port, 2222);
    assert_eq!(first.vnc_port, Some(5900));
    assert_eq!(first.rdp_port, Some(3389));
    assert_eq!(first.wayvnc_port, Some(5901));

    let second = rt
        .allocate(&AllocationRequest::new(id("second")))
        .unwrap()
        .into_inner();
    assert_eq!(second.ssh_port, 2223);
}

#[test]
fn overlapping_vnc_ranges_stay_disjoint() {
    let h = Harness::memory();
    let rt = h.runtime(100);

    let a = rt.allocate(&full("a")).unwrap().into_inner();
    let b = rt.allocate(&full("b")).unwrap().into_inner();

    // b's vnc scan meets a's wayvnc lock on 5901
    assert_eq!(b.vnc_port, Some(5902));
    assert_eq!(b.wayvnc_port, Some(5903));
    assert!(a.allocated_ports.is_disjoint(&b.allocated_ports));
}

#[test]
fn foreign_listener_is_skipped() {
    let h = Harness::memory();
    h.probe.occupy([2222]);

    let d = h
        .runtime(100)
        .allocate(&AllocationRequest::new(id("a")))
        .unwrap()
        .into_inner();
    assert_eq!(d.ssh_port, 2223);
}

#[test]
fn exhausted_range_leaves_no_locks() {
    let h = Harness::memory();
    let mut options = h.options();
    options.max_instances = 2;
    h.probe.occupy([5900, 5901]);

    let err = h
        .runtime_with(100, options)
        .allocate(&AllocationRequest::new(id("a")).with_vnc(PortRequest::Auto))
        .unwrap_err();

    assert!(matches!(err, EmuportError::ExhaustedRange { .. }));
    assert!(err.remediation().is_some());
    assert!(h.locked_ports().is_empty());
}

// ============================================================================
// EXPLICIT PORTS
// ============================================================================

#[test]
fn explicit_port_held_by_live_instance_is_unavailable() {
    let h = Harness::filesystem();
    let other = h.runtime(100);
    let mine = h.runtime(200);

    other
        .allocate(&AllocationRequest::new(id("other")))
        .unwrap()
        .into_inner();

    let err = mine
        .allocate(&AllocationRequest::new(id("mine")).with_ssh(PortRequest::Port(2222)))
        .unwrap_err();

    assert!(matches!(err, EmuportError::PortUnavailable { port: 2222, .. }));
    assert_eq!(h.locked_ports(), vec![2222]);
    assert!(mine.get(&id("mine")).unwrap().is_none());
}

#[test]
fn explicit_port_of_dead_owner_is_reclaimed() {
    let h = Harness::filesystem();
    h.runtime(100)
        .allocate(&AllocationRequest::new(id("dead")))
        .unwrap()
        .into_inner();
    h.liveness.kill(100);

    let d = h
        .runtime(200)
        .allocate(&AllocationRequest::new(id("mine")).with_ssh(PortRequest::Port(2222)))
        .unwrap()
        .into_inner();
    assert_eq!(d.ssh_port, 2222);
}

#[test]
fn failed_allocation_rolls_back() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);
    rt.allocate(&AllocationRequest::new(id("existing")))
        .unwrap()
        .into_inner();
    let before = h.locked_ports();

    h.probe.occupy([3389]);
    let request = AllocationRequest::new(id("doomed"))
        .with_vnc(PortRequest::Auto)
        .with_rdp(PortRequest::Port(3389));
    let err = rt.allocate(&request).unwrap_err();

    assert!(matches!(err, EmuportError::PortUnavailable { port: 3389, .. }));
    assert_eq!(h.locked_ports(), before);
    assert!(rt.get(&id("doomed")).unwrap().is_none());
}

#[test]
fn conflicting_explicit_ports_are_rejected() {
    let h = Harness::memory();
    let request = AllocationRequest::new(id("a"))
        .with_vnc(PortRequest::Port(5950))
        .with_wayvnc(PortRequest::Port(5950));

    let err = h.runtime(100).allocate(&request).unwrap_err();
    assert!(matches!(err, EmuportError::ConflictingRequest(_)));
    assert!(h.locked_ports().is_empty());
}

// ============================================================================
// RE-ENTRY
// ============================================================================

#[test]
fn reallocating_returns_identical_assignment() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);

    let first = rt.allocate(&full("same")).unwrap().into_inner();
    let second = rt.allocate(&full("same")).unwrap().into_inner();

    assert_eq!(first, second);
    assert_eq!(h.locked_ports().len(), 4);
}

#[test]
fn descriptor_tracks_exactly_its_ports() {
    let h = Harness::filesystem();
    let rt = h.runtime(100);
    let d = rt
        .allocate(&AllocationRequest::new(id("x")).with_rdp(PortRequest::Auto))
        .unwrap()
        .into_inner();

    let populated: BTreeSet<u16> = d.services().into_iter().map(|(_, port)| port).collect();
    assert_eq!(d.allocated_ports, populated);
    assert_eq!(d.port(ServiceKind::Vnc), None);

    for port in &d.allocated_ports {
        let record = h.store().read_port_lock(*port).unwrap().unwrap();
        assert_eq!(record.instance_id, d.instance_id);
        assert_eq!(record.owner_pid, 100);
    }
}

#[test]
fn reentry_after_ports_were_reclaimed_allocates_again() {
    let h = Harness::filesystem();
    h.runtime(100).allocate(&full("x")).unwrap().into_inner();
    h.liveness.kill(100);

    let y = h.runtime(200).allocate(&full("y")).unwrap().into_inner();
    assert_eq!(y.ssh_port, 2222);

    let rt = h.runtime(300);
    let x = rt.allocate(&full("x")).unwrap().into_inner();
    h.liveness.start(5000);
    rt.supervisor(&id("x")).unwrap().adopt(5000).unwrap();

    assert!(x.allocated_ports.is_disjoint(&y.allocated_ports));
    let descriptors = h.store().list_instances().unwrap();
    assert_eq!(descriptors.len(), 2);
    let mut seen = BTreeSet::new();
    for d in &descriptors {
        for port in &d.allocated_ports {
            assert!(seen.insert(*port), "port {port} assigned twice");
            let record = h.store().read_port_lock(*port).unwrap().unwrap();
            assert_eq!(record.instance_id, d.instance_id);
        }
    }
    assert_eq!(h.locked_ports().len(), seen.len());
}

#[test]
fn reentry_with_lost_lock_discards_descriptor() {
    let h = Harness::memory();
    let rt = h.runtime(100);
    let before = rt
        .allocate(&AllocationRequest::new(id("x")))
        .unwrap()
        .into_inner();
    assert_eq!(before.ssh_port, 2222);

    let mut record = h.store().read_port_lock(2222).unwrap().unwrap();
    record.instance_id = id("other");
    record.owner_pid = 200;
    h.liveness.start(200);
    h.store().write_port_lock(&record).unwrap();

    let after = rt
        .allocate(&AllocationRequest::new(id("x")))
        .unwrap()
        .into_inner();
    assert_eq!(after.ssh_port, 2223);
    assert_eq!(
        h.store().read_port_lock(2222).unwrap().unwrap().instance_id,
        id("other")
    );
    assert_eq!(h.locked_ports(), vec![2222, 2223]);
}
