//! Concurrent allocation races on the filesystem store.
//!
//! Runtimes with distinct pids stand in for separate launcher processes;
//! flock arbitration is per open file, so they contend exactly like
//! processes do.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use emuport::{AllocationRequest, InstanceDescriptor, InstanceId, PortRequest};
use emuport_test_utils::Harness;

const RACERS: u32 = 8;

fn race<F>(h: &Harness, request_for: F) -> Vec<InstanceDescriptor>
where
    F: Fn(u32) -> AllocationRequest + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(RACERS as usize));
    let request_for = Arc::new(request_for);

    let handles: Vec<_> = (0..RACERS)
        .map(|n| {
            let rt = h.runtime(1000 + n);
            let barrier = barrier.clone();
            let request_for = request_for.clone();
            thread::spawn(move || {
                let request = request_for(n);
                barrier.wait();
                rt.allocate(&request).map(|guard| guard.into_inner())
            })
        })
        .collect();

    handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap().ok())
        .collect()
}

#[test]
fn concurrent_auto_allocations_never_collide() {
    let h = Harness::filesystem();

    let descriptors = race(&h, |n| {
        AllocationRequest::new(InstanceId::parse(&format!("racer-{n}")).unwrap())
            .with_vnc(PortRequest::Auto)
            .with_wayvnc(PortRequest::Auto)
    });
    assert_eq!(descriptors.len(), RACERS as usize);

    let mut seen = BTreeSet::new();
    for d in &descriptors {
        for port in &d.allocated_ports {
            assert!(seen.insert(*port), "port {port} allocated twice");
        }
    }

    let ssh: BTreeSet<u16> = descriptors.iter().map(|d| d.ssh_port).collect();
    let expected: BTreeSet<u16> = (2222..2222 + RACERS as u16).collect();
    assert_eq!(ssh, expected);
    assert_eq!(h.locked_ports().len(), seen.len());
}

#[test]
fn concurrent_explicit_requests_have_one_winner() {
    let h = Harness::filesystem();

    let winners = race(&h, |n| {
        AllocationRequest::new(InstanceId::parse(&format!("explicit-{n}")).unwrap())
            .with_ssh(PortRequest::Port(2250))
    });

    assert_eq!(winners.len(), 1);
    assert_eq!(h.locked_ports(), vec![2250]);
}

#[test]
fn concurrent_reentry_allocates_once() {
    let h = Harness::filesystem();

    let results = race(&h, |_| {
        AllocationRequest::new(InstanceId::parse("shared").unwrap()).with_rdp(PortRequest::Auto)
    });

    assert_eq!(results.len(), RACERS as usize);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(h.locked_ports(), vec![2222, 3389]);
}
