//! Port allocation for a single instance.
//!
//! Services are allocated in a fixed order (ssh, vnc, rdp, wayvnc). An
//! explicit port must be free and lockable or the whole request fails; an
//! `auto` request takes the lowest free, lockable port of the service's
//! range. Any failure releases every lock taken during the call, so a
//! failed allocation leaves the lock set exactly as it found it.

use std::collections::BTreeSet;
use std::sync::Arc;

use emuport_shared::errors::{EmuportError, EmuportResult};

use crate::lock::{PortLockManager, ReleaseOutcome};
use crate::management::InstanceRegistry;
use crate::probe::PortProbe;
use crate::runtime::constants::keys;
use crate::runtime::options::PortBases;
use crate::runtime::types::{InstanceDescriptor, InstanceId, PortRequest, ServiceKind};
use crate::store::Store;

/// Which services to allocate and how to pick each port.
///
/// SSH is always allocated; `None` disables an optional service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub instance_id: InstanceId,
    pub ssh: PortRequest,
    pub vnc: Option<PortRequest>,
    pub rdp: Option<PortRequest>,
    pub wayvnc: Option<PortRequest>,
}

impl AllocationRequest {
    /// SSH only, auto-allocated.
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            ssh: PortRequest::Auto,
            vnc: None,
            rdp: None,
            wayvnc: None,
        }
    }

    /// Build a request from enable flags and per-service port requests.
    /// The requested port of a disabled service is ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn from_flags(
        instance_id: InstanceId,
        enable_vnc: bool,
        enable_rdp: bool,
        enable_wayvnc: bool,
        requested_ssh: PortRequest,
        requested_vnc: PortRequest,
        requested_rdp: PortRequest,
        requested_wayvnc: PortRequest,
    ) -> Self {
        Self {
            instance_id,
            ssh: requested_ssh,
            vnc: enable_vnc.then_some(requested_vnc),
            rdp: enable_rdp.then_some(requested_rdp),
            wayvnc: enable_wayvnc.then_some(requested_wayvnc),
        }
    }

    pub fn with_ssh(mut self, request: PortRequest) -> Self {
        self.ssh = request;
        self
    }

    pub fn with_vnc(mut self, request: PortRequest) -> Self {
        self.vnc = Some(request);
        self
    }

    pub fn with_rdp(mut self, request: PortRequest) -> Self {
        self.rdp = Some(request);
        self
    }

    pub fn with_wayvnc(mut self, request: PortRequest) -> Self {
        self.wayvnc = Some(request);
        self
    }

    pub fn request(&self, kind: ServiceKind) -> Option<PortRequest> {
        match kind {
            ServiceKind::Ssh => Some(self.ssh),
            ServiceKind::Vnc => self.vnc,
            ServiceKind::Rdp => self.rdp,
            ServiceKind::WayVnc => self.wayvnc,
        }
    }

    /// Enabled services in allocation order.
    pub fn services(&self) -> Vec<(ServiceKind, PortRequest)> {
        ServiceKind::ALL
            .iter()
            .filter_map(|kind| self.request(*kind).map(|request| (*kind, request)))
            .collect()
    }

    /// Explicit ports, rejecting a port named by two services.
    fn explicit_ports(&self) -> EmuportResult<BTreeSet<u16>> {
        let mut seen: Vec<(ServiceKind, u16)> = Vec::new();
        for (kind, request) in self.services() {
            let Some(port) = request.explicit() else {
                continue;
            };
            if let Some((other, _)) = seen.iter().find(|(_, p)| *p == port) {
                return Err(EmuportError::ConflictingRequest(format!(
                    "{} and {} both request port {}",
                    other, kind, port
                )));
            }
            seen.push((kind, port));
        }
        Ok(seen.into_iter().map(|(_, port)| port).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Allocator {
    store: Arc<dyn Store>,
    locks: PortLockManager,
    registry: InstanceRegistry,
    probe: Arc<dyn PortProbe>,
    bases: PortBases,
    max_instances: u16,
}

impl Allocator {
    pub fn new(
        store: Arc<dyn Store>,
        locks: PortLockManager,
        registry: InstanceRegistry,
        probe: Arc<dyn PortProbe>,
        bases: PortBases,
        max_instances: u16,
    ) -> Self {
        Self {
            store,
            locks,
            registry,
            probe,
            bases,
            max_instances,
        }
    }

    /// Allocate every requested port for `request.instance_id` and persist
    /// its descriptor with a pending emulator.
    ///
    /// Re-entrant: if the instance already has a descriptor that still holds
    /// all of its port locks, it is returned unchanged and nothing is
    /// locked. A descriptor that lost a lock to a reclaiming allocation is
    /// discarded and the instance is allocated again.
    ///
    /// # Errors
    ///
    /// - [`EmuportError::ConflictingRequest`] if two services name the same
    ///   explicit port
    /// - [`EmuportError::PortUnavailable`] if an explicit port is in use or
    ///   locked
    /// - [`EmuportError::ExhaustedRange`] if an auto scan finds nothing
    pub fn allocate(&self, request: &AllocationRequest) -> EmuportResult<InstanceDescriptor> {
        let id = &request.instance_id;
        let _guard = self.store.lock_key(&keys::instance(id))?;

        if let Some(existing) = self.registry.get(id)? {
            if self.still_holds_ports(&existing)? {
                tracing::debug!(instance_id = %id, "Instance already allocated, returning it");
                return Ok(existing);
            }
            self.discard_stale(&existing)?;
        }

        let reserved = request.explicit_ports()?;

        let mut acquired: Vec<(ServiceKind, u16)> = Vec::new();
        for (kind, port_request) in request.services() {
            let result = match port_request {
                PortRequest::Port(port) => self.acquire_explicit(kind, port, id).map(|()| port),
                PortRequest::Auto => self.acquire_auto(kind, id, &reserved, &acquired),
            };
            match result {
                Ok(port) => acquired.push((kind, port)),
                Err(e) => {
                    tracing::warn!(
                        instance_id = %id,
                        service = %kind,
                        request = %port_request,
                        error = %e,
                        "Allocation failed, rolling back"
                    );
                    self.rollback(id, &acquired);
                    return Err(e);
                }
            }
        }

        let descriptor = InstanceDescriptor::new(id.clone(), &acquired, self.locks.pid())
            .and_then(|descriptor| self.registry.create(&descriptor).map(|()| descriptor));
        let descriptor = match descriptor {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!(instance_id = %id, error = %e, "Failed to persist descriptor");
                self.rollback(id, &acquired);
                return Err(e);
            }
        };

        tracing::info!(
            instance_id = %id,
            ssh = descriptor.ssh_port,
            vnc = ?descriptor.vnc_port,
            rdp = ?descriptor.rdp_port,
            wayvnc = ?descriptor.wayvnc_port,
            "Allocated ports"
        );
        Ok(descriptor)
    }

    fn acquire_explicit(&self, kind: ServiceKind, port: u16, id: &InstanceId) -> EmuportResult<()> {
        if self.probe.is_port_in_use(port) {
            return Err(EmuportError::PortUnavailable {
                port,
                reason: format!("{} port is in use by another process", kind),
            });
        }

        if !self.locks.acquire_lock(port, id)? {
            let reason = match self.locks.holder(port)? {
                Some(holder) => format!(
                    "locked by instance {} (pid {})",
                    holder.instance_id, holder.owner_pid
                ),
                None => "locked by a concurrent allocation".to_string(),
            };
            return Err(EmuportError::PortUnavailable { port, reason });
        }

        tracing::debug!(instance_id = %id, service = %kind, port, "Locked explicit port");
        Ok(())
    }

    /// Lowest free, lockable port in `base..base + max_instances`.
    ///
    /// Ports explicitly requested elsewhere in the same request are skipped
    /// so an earlier auto service cannot take them.
    fn acquire_auto(
        &self,
        kind: ServiceKind,
        id: &InstanceId,
        reserved: &BTreeSet<u16>,
        acquired: &[(ServiceKind, u16)],
    ) -> EmuportResult<u16> {
        let base = kind.base_port(&self.bases);

        for offset in 0..self.max_instances {
            let Some(port) = base.checked_add(offset) else {
                break;
            };
            if reserved.contains(&port) || acquired.iter().any(|(_, p)| *p == port) {
                continue;
            }
            if self.probe.is_port_in_use(port) {
                tracing::trace!(service = %kind, port, "Candidate in use, skipping");
                continue;
            }
            if self.locks.acquire_lock(port, id)? {
                tracing::debug!(instance_id = %id, service = %kind, port, "Locked auto port");
                return Ok(port);
            }
        }

        Err(EmuportError::ExhaustedRange {
            service: kind.to_string(),
            base,
            span: self.max_instances,
        })
    }

    /// Whether every port of `descriptor` still carries its lock record.
    fn still_holds_ports(&self, descriptor: &InstanceDescriptor) -> EmuportResult<bool> {
        for port in &descriptor.allocated_ports {
            let held = self
                .locks
                .holder(*port)?
                .is_some_and(|record| record.instance_id == descriptor.instance_id);
            if !held {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop a descriptor whose locks were reclaimed by someone else, so the
    /// instance is allocated afresh instead of reusing ports it lost.
    fn discard_stale(&self, descriptor: &InstanceDescriptor) -> EmuportResult<()> {
        let id = &descriptor.instance_id;
        let mut released = Vec::new();
        for port in &descriptor.allocated_ports {
            if self.locks.release_for_instance(*port, id)? == ReleaseOutcome::Released {
                released.push(*port);
            }
        }
        self.registry.delete(id)?;
        tracing::warn!(
            instance_id = %id,
            ports = ?descriptor.allocated_ports,
            released = ?released,
            "Instance lost its port locks, allocating again"
        );
        Ok(())
    }

    fn rollback(&self, id: &InstanceId, acquired: &[(ServiceKind, u16)]) {
        for (kind, port) in acquired {
            if let Err(e) = self.locks.release_for_instance(*port, id) {
                tracing::error!(
                    instance_id = %id,
                    service = %kind,
                    port,
                    error = %e,
                    "Failed to release port during rollback"
                );
            }
        }
    }
}
