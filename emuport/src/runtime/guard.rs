//! Scoped ownership of a fresh allocation.

use crate::controller::InstanceSupervisor;
use crate::runtime::core::EmuportRuntime;
use crate::runtime::handoff::AllocationResult;
use crate::runtime::types::{InstanceDescriptor, InstanceId, InstanceRelease};
use emuport_shared::errors::EmuportResult;

/// Handle to an allocation that is released on every exit path.
///
/// Dropping the guard releases the instance's ports and descriptor.
/// Hand it to a supervisor with [`commit`](Self::commit), or keep the
/// allocation beyond this process with [`into_inner`](Self::into_inner).
#[derive(Debug)]
pub struct AllocationGuard {
    runtime: EmuportRuntime,
    descriptor: InstanceDescriptor,
    armed: bool,
}

impl AllocationGuard {
    pub(crate) fn new(runtime: EmuportRuntime, descriptor: InstanceDescriptor) -> Self {
        Self {
            runtime,
            descriptor,
            armed: true,
        }
    }

    pub fn descriptor(&self) -> &InstanceDescriptor {
        &self.descriptor
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.descriptor.instance_id
    }

    pub fn result(&self) -> AllocationResult {
        AllocationResult::from_descriptor(&self.descriptor)
    }

    /// Transfer responsibility for the allocation to a supervisor, which
    /// releases it when the emulator stops.
    pub fn commit(mut self) -> InstanceSupervisor {
        self.armed = false;
        InstanceSupervisor::new(self.runtime.clone(), self.descriptor.instance_id.clone())
    }

    /// Keep the allocation. It stays reserved until released explicitly or
    /// reclaimed by a sweep after this process exits.
    pub fn into_inner(mut self) -> InstanceDescriptor {
        self.armed = false;
        self.descriptor.clone()
    }

    /// Release now, reporting the outcome.
    pub fn release(mut self) -> EmuportResult<InstanceRelease> {
        self.armed = false;
        self.runtime.release_instance(&self.descriptor.instance_id)
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.runtime.release_instance(&self.descriptor.instance_id) {
            Ok(outcome) => tracing::debug!(
                instance_id = %self.descriptor.instance_id,
                outcome = ?outcome,
                "Released dropped allocation"
            ),
            Err(e) => tracing::error!(
                instance_id = %self.descriptor.instance_id,
                error = %e,
                "Failed to release dropped allocation"
            ),
        }
    }
}
