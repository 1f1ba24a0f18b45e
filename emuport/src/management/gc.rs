//! Stale instance and lock reclamation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use emuport_shared::errors::EmuportResult;
use serde::Serialize;

use crate::lock::{PortLockManager, ReleaseOutcome};
use crate::management::InstanceRegistry;
use crate::runtime::constants::keys;
use crate::runtime::handoff;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::types::{InstanceDescriptor, InstanceId, PortLockRecord};
use crate::store::Store;
use crate::util::ProcessLiveness;

/// What one sweep reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub reclaimed_instances: Vec<InstanceId>,
    /// Ports freed while reclaiming instances.
    pub released_ports: Vec<u16>,
    /// Ports whose lock had no descriptor.
    pub orphan_locks: Vec<u16>,
    /// Instances whose idle key arbiter was deleted. Housekeeping only,
    /// not counted as reclaimed.
    pub pruned_arbiters: Vec<InstanceId>,
}

impl SweepReport {
    /// Reclaimed descriptors plus orphan locks.
    pub fn count(&self) -> usize {
        self.reclaimed_instances.len() + self.orphan_locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Reclaims descriptors and locks whose owners are gone.
///
/// Safe to run alongside live instances and other collectors: every
/// instance is reclaimed under its key mutex (skipped if busy), and locks
/// are only removed while they still name the reclaimed instance.
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    store: Arc<dyn Store>,
    liveness: Arc<dyn ProcessLiveness>,
    locks: PortLockManager,
    registry: InstanceRegistry,
    layout: FilesystemLayout,
    retention: Duration,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn Store>,
        liveness: Arc<dyn ProcessLiveness>,
        locks: PortLockManager,
        layout: FilesystemLayout,
        retention: Duration,
    ) -> Self {
        let registry = InstanceRegistry::new(store.clone(), liveness.clone());
        Self {
            store,
            liveness,
            locks,
            registry,
            layout,
            retention,
        }
    }

    pub fn sweep(&self) -> EmuportResult<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for descriptor in self.registry.list()? {
            if !self.is_stale(&descriptor, now) {
                continue;
            }
            if let Some(ports) = self.reclaim(&descriptor.instance_id, now)? {
                report.reclaimed_instances.push(descriptor.instance_id);
                report.released_ports.extend(ports);
            }
        }

        for record in self.store.list_port_locks()? {
            if self.reclaim_orphan(&record, now)? {
                report.orphan_locks.push(record.port);
            }
        }

        report.pruned_arbiters = self.prune_arbiters(now)?;

        if report.is_empty() {
            tracing::debug!("Sweep found nothing to reclaim");
        } else {
            tracing::info!(
                instances = report.reclaimed_instances.len(),
                released_ports = ?report.released_ports,
                orphan_locks = ?report.orphan_locks,
                "Sweep reclaimed stale state"
            );
        }
        Ok(report)
    }

    /// Owners confirmed dead, or older than the retention threshold.
    pub fn is_stale(&self, descriptor: &InstanceDescriptor, now: DateTime<Utc>) -> bool {
        if descriptor.age_secs(now) > self.retention.as_secs() {
            return true;
        }

        let alive = |pid: Option<u32>| pid.is_some_and(|pid| self.liveness.is_alive(pid));
        !alive(Some(descriptor.owner_pid))
            && !alive(descriptor.emulator_pid.pid())
            && !alive(descriptor.supervisor_pid)
    }

    /// Reclaim one instance under its key mutex. `Ok(None)` when another
    /// process is busy with it or it stopped being stale meanwhile.
    fn reclaim(&self, id: &InstanceId, now: DateTime<Utc>) -> EmuportResult<Option<Vec<u16>>> {
        let Some(_guard) = self.store.try_lock_key(&keys::instance(id))? else {
            tracing::debug!(instance_id = %id, "Instance busy, skipping");
            return Ok(None);
        };

        let Some(descriptor) = self.registry.get(id)? else {
            return Ok(None);
        };
        if !self.is_stale(&descriptor, now) {
            return Ok(None);
        }

        let expired = descriptor.age_secs(now) > self.retention.as_secs();
        if expired && self.registry.status(&descriptor).is_live() {
            tracing::warn!(
                instance_id = %id,
                age_secs = descriptor.age_secs(now),
                emulator_pid = %descriptor.emulator_pid,
                "Reclaiming instance past retention while still alive"
            );
        }

        let released = teardown(&self.locks, &self.registry, &self.layout, &descriptor)?;

        tracing::info!(
            instance_id = %id,
            owner_pid = descriptor.owner_pid,
            ports = ?released,
            "Reclaimed stale instance"
        );
        Ok(Some(released))
    }

    /// Delete instance arbiters older than retention whose instance is gone.
    ///
    /// Each one is deleted while held and after re-checking that no
    /// descriptor appeared, so an allocation that raced us either owns the
    /// old file (and we skip it) or retries on a new one.
    fn prune_arbiters(&self, now: DateTime<Utc>) -> EmuportResult<Vec<InstanceId>> {
        let cutoff = now - chrono::Duration::seconds(self.retention.as_secs() as i64);
        let mut pruned = Vec::new();

        for key in self.store.idle_keys(keys::INSTANCE_PREFIX, cutoff)? {
            let Some(id) = keys::parse_instance(&key) else {
                continue;
            };
            let Some(guard) = self.store.try_lock_key(&key)? else {
                continue;
            };
            if self.store.read_instance(&id)?.is_some() {
                continue;
            }
            if guard.discard()? {
                tracing::debug!(instance_id = %id, "Pruned idle instance arbiter");
                pruned.push(id);
            }
        }
        Ok(pruned)
    }

    fn reclaim_orphan(&self, record: &PortLockRecord, now: DateTime<Utc>) -> EmuportResult<bool> {
        // An allocation in flight holds its instance key until the
        // descriptor is written.
        let Some(_guard) = self.store.try_lock_key(&keys::instance(&record.instance_id))? else {
            return Ok(false);
        };
        if self.registry.get(&record.instance_id)?.is_some() {
            return Ok(false);
        }

        let age = (now - record.acquired_at).num_seconds().max(0) as u64;
        let expired = age > self.retention.as_secs();
        if !expired && !self.locks.is_abandoned(record)? {
            return Ok(false);
        }

        let removed = self.locks.remove_orphan(record)?;
        if removed {
            tracing::info!(
                port = record.port,
                instance_id = %record.instance_id,
                owner_pid = record.owner_pid,
                age_secs = age,
                "Removed orphan port lock"
            );
        }
        Ok(removed)
    }
}

/// Release every lock of `descriptor`, then delete it and its handoff file.
/// Returns the ports actually released.
///
/// The caller must hold the instance's key mutex and have established its
/// authority over the instance.
pub(crate) fn teardown(
    locks: &PortLockManager,
    registry: &InstanceRegistry,
    layout: &FilesystemLayout,
    descriptor: &InstanceDescriptor,
) -> EmuportResult<Vec<u16>> {
    let id = &descriptor.instance_id;
    let mut released = Vec::new();
    for port in &descriptor.allocated_ports {
        if locks.release_for_instance(*port, id)? == ReleaseOutcome::Released {
            released.push(*port);
        }
    }
    registry.delete(id)?;
    handoff::remove(layout, id);
    Ok(released)
}
