//! Durable instance registry.

use std::sync::Arc;

use emuport_shared::errors::{EmuportError, EmuportResult};

use crate::runtime::constants::keys;
use crate::runtime::types::{
    EmulatorPid, InstanceDescriptor, InstanceId, InstanceInfo, InstanceStatus,
};
use crate::store::Store;
use crate::util::ProcessLiveness;

/// Keyed store of instance descriptors shared by every process that
/// launches, supervises or lists instances.
///
/// # Design
///
/// - **Durable**: descriptors live in the [`Store`], not in process memory
/// - **Snapshot reads**: the store replaces records atomically, so readers
///   never need a lock
/// - **Serialized mutation**: `update` holds the instance's key mutex for
///   its read-modify-write
/// - **Derived status**: liveness is computed on read via [`ProcessLiveness`]
#[derive(Clone, Debug)]
pub struct InstanceRegistry {
    store: Arc<dyn Store>,
    liveness: Arc<dyn ProcessLiveness>,
}

impl InstanceRegistry {
    pub fn new(store: Arc<dyn Store>, liveness: Arc<dyn ProcessLiveness>) -> Self {
        Self { store, liveness }
    }

    /// Register a new descriptor.
    ///
    /// The caller must hold the instance's key mutex.
    ///
    /// # Errors
    ///
    /// Returns error if a descriptor with this id already exists.
    pub fn create(&self, descriptor: &InstanceDescriptor) -> EmuportResult<()> {
        if self.store.read_instance(&descriptor.instance_id)?.is_some() {
            return Err(EmuportError::InvalidState(format!(
                "instance {} already registered",
                descriptor.instance_id
            )));
        }

        tracing::debug!(
            instance_id = %descriptor.instance_id,
            ports = ?descriptor.allocated_ports,
            owner_pid = descriptor.owner_pid,
            "Registering instance"
        );
        self.store.write_instance(descriptor)
    }

    /// Returns `Ok(None)` if the instance doesn't exist.
    pub fn get(&self, id: &InstanceId) -> EmuportResult<Option<InstanceDescriptor>> {
        self.store.read_instance(id)
    }

    /// Apply `mutate` to a descriptor under its key mutex and persist the
    /// result atomically.
    ///
    /// # Errors
    ///
    /// Returns error if the instance doesn't exist or `mutate` fails; in
    /// both cases nothing is written.
    pub fn update<F>(&self, id: &InstanceId, mutate: F) -> EmuportResult<InstanceDescriptor>
    where
        F: FnOnce(&mut InstanceDescriptor) -> EmuportResult<()>,
    {
        let _guard = self.store.lock_key(&keys::instance(id))?;

        let mut descriptor = self
            .store
            .read_instance(id)?
            .ok_or_else(|| EmuportError::NotFound(format!("instance {}", id)))?;

        mutate(&mut descriptor)?;
        self.store.write_instance(&descriptor)?;

        tracing::trace!(instance_id = %id, "Updated instance descriptor");
        Ok(descriptor)
    }

    /// Record the emulator pid, replacing `PENDING`.
    ///
    /// This is the single mutation a descriptor receives after creation.
    /// `supervisor_pid` is the process that will monitor the emulator.
    pub fn record_emulator(
        &self,
        id: &InstanceId,
        emulator_pid: u32,
        supervisor_pid: u32,
    ) -> EmuportResult<InstanceDescriptor> {
        self.update(id, |descriptor| {
            match descriptor.emulator_pid {
                EmulatorPid::Pending => {}
                EmulatorPid::Running(existing) if existing == emulator_pid => {}
                EmulatorPid::Running(existing) => {
                    return Err(EmuportError::InvalidState(format!(
                        "instance {} already records emulator pid {}",
                        id, existing
                    )));
                }
            }
            descriptor.emulator_pid = EmulatorPid::Running(emulator_pid);
            descriptor.supervisor_pid = Some(supervisor_pid);
            Ok(())
        })
    }

    /// Remove a descriptor. Returns whether it existed.
    ///
    /// Port locks are not touched; see `EmuportRuntime::release_instance`.
    pub fn delete(&self, id: &InstanceId) -> EmuportResult<bool> {
        tracing::debug!(instance_id = %id, "Removing instance descriptor");
        self.store.remove_instance(id)
    }

    /// All descriptors, oldest first.
    pub fn list(&self) -> EmuportResult<Vec<InstanceDescriptor>> {
        self.store.list_instances()
    }

    pub fn count(&self) -> EmuportResult<usize> {
        Ok(self.list()?.len())
    }

    /// Status derived from current process liveness.
    pub fn status(&self, descriptor: &InstanceDescriptor) -> InstanceStatus {
        match descriptor.emulator_pid {
            EmulatorPid::Running(pid) if self.liveness.is_alive(pid) => InstanceStatus::Running,
            EmulatorPid::Running(_) => InstanceStatus::Stopped,
            EmulatorPid::Pending => {
                let claimant_alive = self.liveness.is_alive(descriptor.owner_pid)
                    || descriptor
                        .supervisor_pid
                        .is_some_and(|pid| self.liveness.is_alive(pid));
                if claimant_alive {
                    InstanceStatus::Starting
                } else {
                    InstanceStatus::Stopped
                }
            }
        }
    }

    /// Snapshot of every instance with its derived status.
    pub fn infos(&self) -> EmuportResult<Vec<InstanceInfo>> {
        Ok(self
            .list()?
            .iter()
            .map(|d| InstanceInfo::from_descriptor(d, self.status(d)))
            .collect())
    }
}
