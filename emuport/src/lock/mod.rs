//! Per-port locks shared across processes.
//!
//! A port is locked when a [`PortLockRecord`] exists for it and the record
//! is not abandoned. Records are only created, replaced or removed while
//! holding the port's key mutex, which makes acquisition atomic with
//! respect to every other emuport process on the host.
//!
//! A record is abandoned when its owner process is dead and its instance
//! has no live emulator or supervisor. The second condition keeps a lock
//! alive after the menu that allocated it exits while a launcher still
//! runs the emulator.

mod file;

pub use file::FileMutex;

use std::sync::Arc;

use chrono::Utc;
use emuport_shared::errors::EmuportResult;

use crate::runtime::constants::keys;
use crate::runtime::types::{InstanceId, PortLockRecord};
use crate::store::Store;
use crate::util::ProcessLiveness;

/// Outcome of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// No record existed (or it belonged to another instance).
    NotHeld,
    /// The record belongs to a live process other than the caller.
    Refused { owner_pid: u32 },
}

#[derive(Debug, Clone)]
pub struct PortLockManager {
    store: Arc<dyn Store>,
    liveness: Arc<dyn ProcessLiveness>,
    pid: u32,
}

impl PortLockManager {
    /// `pid` is the identity recorded as owner of every lock this manager
    /// takes, normally `std::process::id()`.
    pub fn new(store: Arc<dyn Store>, liveness: Arc<dyn ProcessLiveness>, pid: u32) -> Self {
        Self {
            store,
            liveness,
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Try to lock `port` for `instance_id`.
    ///
    /// Never waits: returns `Ok(false)` when another caller holds the port's
    /// key mutex or a live lock record exists. An abandoned record found on
    /// the way is deleted and the acquisition proceeds.
    pub fn acquire_lock(&self, port: u16, instance_id: &InstanceId) -> EmuportResult<bool> {
        let Some(_guard) = self.store.try_lock_key(&keys::port(port))? else {
            tracing::trace!(port, "Port mutex busy");
            return Ok(false);
        };

        if let Some(existing) = self.store.read_port_lock(port)? {
            if !self.is_abandoned(&existing)? {
                tracing::trace!(
                    port,
                    holder = %existing.instance_id,
                    owner_pid = existing.owner_pid,
                    "Port already locked"
                );
                return Ok(false);
            }

            tracing::info!(
                port,
                stale_instance = %existing.instance_id,
                stale_pid = existing.owner_pid,
                "Removing stale port lock"
            );
            self.store.remove_port_lock(port)?;
            self.retire_instance(&existing)?;
        }

        self.store.write_port_lock(&PortLockRecord {
            port,
            instance_id: instance_id.clone(),
            acquired_at: Utc::now(),
            owner_pid: self.pid,
        })?;

        tracing::debug!(port, instance_id = %instance_id, pid = self.pid, "Acquired port lock");
        Ok(true)
    }

    /// Release `port` if the caller may.
    ///
    /// Permitted when the caller owns the record, supervises its instance,
    /// or the record is abandoned. A live foreign lock is never removed.
    pub fn release_lock(&self, port: u16) -> EmuportResult<ReleaseOutcome> {
        let _guard = self.store.lock_key(&keys::port(port))?;

        let Some(record) = self.store.read_port_lock(port)? else {
            return Ok(ReleaseOutcome::NotHeld);
        };

        if !self.may_release(&record)? {
            tracing::warn!(
                port,
                holder = %record.instance_id,
                owner_pid = record.owner_pid,
                caller_pid = self.pid,
                "Refusing to release port held by a live process"
            );
            return Ok(ReleaseOutcome::Refused {
                owner_pid: record.owner_pid,
            });
        }

        self.store.remove_port_lock(port)?;
        tracing::debug!(port, instance_id = %record.instance_id, "Released port lock");
        Ok(ReleaseOutcome::Released)
    }

    /// Remove `port`'s record only if it still belongs to `instance_id`.
    ///
    /// Callers must already have established authority over the instance
    /// (its owner, its supervisor, or a collector that proved it stale).
    /// The instance check keeps a port that was reclaimed and re-locked by
    /// someone else from being released.
    pub(crate) fn release_for_instance(
        &self,
        port: u16,
        instance_id: &InstanceId,
    ) -> EmuportResult<ReleaseOutcome> {
        let _guard = self.store.lock_key(&keys::port(port))?;

        match self.store.read_port_lock(port)? {
            Some(record) if &record.instance_id == instance_id => {
                self.store.remove_port_lock(port)?;
                tracing::debug!(port, instance_id = %instance_id, "Released port lock");
                Ok(ReleaseOutcome::Released)
            }
            Some(record) => {
                tracing::debug!(
                    port,
                    instance_id = %instance_id,
                    holder = %record.instance_id,
                    "Port now belongs to another instance, leaving it"
                );
                Ok(ReleaseOutcome::NotHeld)
            }
            None => Ok(ReleaseOutcome::NotHeld),
        }
    }

    /// Remove a record with no descriptor, re-checking under the port mutex
    /// that it is still the same record.
    pub(crate) fn remove_orphan(&self, expected: &PortLockRecord) -> EmuportResult<bool> {
        let Some(_guard) = self.store.try_lock_key(&keys::port(expected.port))? else {
            return Ok(false);
        };

        match self.store.read_port_lock(expected.port)? {
            Some(current) if &current == expected => self.store.remove_port_lock(expected.port),
            _ => Ok(false),
        }
    }

    /// Current record for `port`, if any.
    pub fn holder(&self, port: u16) -> EmuportResult<Option<PortLockRecord>> {
        self.store.read_port_lock(port)
    }

    /// Whether `record` may be reclaimed by any caller.
    pub fn is_abandoned(&self, record: &PortLockRecord) -> EmuportResult<bool> {
        if self.liveness.is_alive(record.owner_pid) {
            return Ok(false);
        }

        let instance_alive = match self.store.read_instance(&record.instance_id)? {
            Some(descriptor) => {
                descriptor
                    .emulator_pid
                    .pid()
                    .is_some_and(|pid| self.liveness.is_alive(pid))
                    || descriptor
                        .supervisor_pid
                        .is_some_and(|pid| self.liveness.is_alive(pid))
            }
            None => false,
        };

        Ok(!instance_alive)
    }

    /// Delete the descriptor behind an abandoned lock just reclaimed, so it
    /// cannot be re-entered or listed with a port it no longer holds. Its
    /// remaining locks are left to the orphan pass of the next sweep.
    /// Skipped when the instance key is busy.
    fn retire_instance(&self, record: &PortLockRecord) -> EmuportResult<()> {
        let Some(_guard) = self.store.try_lock_key(&keys::instance(&record.instance_id))? else {
            return Ok(());
        };
        if self.store.read_instance(&record.instance_id)?.is_none() || !self.is_abandoned(record)? {
            return Ok(());
        }

        self.store.remove_instance(&record.instance_id)?;
        tracing::info!(
            instance_id = %record.instance_id,
            owner_pid = record.owner_pid,
            "Retired abandoned instance"
        );
        Ok(())
    }

    fn may_release(&self, record: &PortLockRecord) -> EmuportResult<bool> {
        if record.owner_pid == self.pid {
            return Ok(true);
        }

        let supervises = self
            .store
            .read_instance(&record.instance_id)?
            .and_then(|d| d.supervisor_pid)
            == Some(self.pid);
        if supervises {
            return Ok(true);
        }

        self.is_abandoned(record)
    }
}
