//! Durable shared state behind the allocator.
//!
//! A [`Store`] holds the two record kinds every cooperating process shares
//! (port lock records and instance descriptors) plus a mutex-per-key
//! primitive. Each record operation is individually atomic; multi-record
//! consistency is the caller's job, achieved by holding the key mutex.
//!
//! - [`FsStore`]: flock arbiters and JSON records under the emuport home
//! - [`MemoryStore`]: process-local, for tests and embedding

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use emuport_shared::errors::EmuportResult;

use crate::runtime::types::{InstanceDescriptor, InstanceId, PortLockRecord};

/// Proof of holding a key mutex. Dropping it releases the key.
pub trait KeyGuard: Send + Debug {
    /// Delete the key's durable arbiter while holding it. `Ok(false)` when
    /// there is nothing to delete.
    fn discard(&self) -> EmuportResult<bool> {
        Ok(false)
    }
}

pub trait Store: Send + Sync + Debug {
    /// Take the mutex for `key` without waiting. `Ok(None)` if held elsewhere.
    fn try_lock_key(&self, key: &str) -> EmuportResult<Option<Box<dyn KeyGuard>>>;

    /// Take the mutex for `key`, waiting for the current holder.
    fn lock_key(&self, key: &str) -> EmuportResult<Box<dyn KeyGuard>>;

    /// Keys starting with `prefix` whose arbiter was created before `cutoff`.
    fn idle_keys(&self, prefix: &str, cutoff: DateTime<Utc>) -> EmuportResult<Vec<String>>;

    fn read_port_lock(&self, port: u16) -> EmuportResult<Option<PortLockRecord>>;

    /// Create or replace the record for `record.port`.
    fn write_port_lock(&self, record: &PortLockRecord) -> EmuportResult<()>;

    /// Returns whether a record existed.
    fn remove_port_lock(&self, port: u16) -> EmuportResult<bool>;

    fn list_port_locks(&self) -> EmuportResult<Vec<PortLockRecord>>;

    fn read_instance(&self, id: &InstanceId) -> EmuportResult<Option<InstanceDescriptor>>;

    /// Create or replace a descriptor. Readers never observe a partial write.
    fn write_instance(&self, descriptor: &InstanceDescriptor) -> EmuportResult<()>;

    /// Returns whether a descriptor existed.
    fn remove_instance(&self, id: &InstanceId) -> EmuportResult<bool>;

    fn list_instances(&self) -> EmuportResult<Vec<InstanceDescriptor>>;
}
