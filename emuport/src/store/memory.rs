//! Process-local store.
//!
//! Clones share state, so several runtimes built on clones of one
//! `MemoryStore` behave like cooperating processes sharing a home directory.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use emuport_shared::errors::EmuportResult;
use parking_lot::{Condvar, Mutex};

use super::{KeyGuard, Store};
use crate::runtime::types::{InstanceDescriptor, InstanceId, PortLockRecord};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
    keys: Arc<KeyTable>,
}

#[derive(Debug, Default)]
struct Records {
    locks: BTreeMap<u16, PortLockRecord>,
    instances: BTreeMap<InstanceId, InstanceDescriptor>,
}

#[derive(Debug, Default)]
struct KeyTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

#[derive(Debug)]
struct MemoryKeyGuard {
    key: String,
    table: Arc<KeyTable>,
}

impl KeyGuard for MemoryKeyGuard {}

impl Drop for MemoryKeyGuard {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.key);
        self.table.released.notify_all();
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self, key: &str) -> Box<dyn KeyGuard> {
        Box::new(MemoryKeyGuard {
            key: key.to_string(),
            table: Arc::clone(&self.keys),
        })
    }
}

impl Store for MemoryStore {
    fn try_lock_key(&self, key: &str) -> EmuportResult<Option<Box<dyn KeyGuard>>> {
        let mut held = self.keys.held.lock();
        if !held.insert(key.to_string()) {
            return Ok(None);
        }
        drop(held);
        Ok(Some(self.guard(key)))
    }

    fn lock_key(&self, key: &str) -> EmuportResult<Box<dyn KeyGuard>> {
        let mut held = self.keys.held.lock();
        while held.contains(key) {
            self.keys.released.wait(&mut held);
        }
        held.insert(key.to_string());
        drop(held);
        Ok(self.guard(key))
    }

    /// Key mutexes leave nothing behind once released.
    fn idle_keys(&self, _prefix: &str, _cutoff: DateTime<Utc>) -> EmuportResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn read_port_lock(&self, port: u16) -> EmuportResult<Option<PortLockRecord>> {
        Ok(self.records.lock().locks.get(&port).cloned())
    }

    fn write_port_lock(&self, record: &PortLockRecord) -> EmuportResult<()> {
        self.records.lock().locks.insert(record.port, record.clone());
        Ok(())
    }

    fn remove_port_lock(&self, port: u16) -> EmuportResult<bool> {
        Ok(self.records.lock().locks.remove(&port).is_some())
    }

    fn list_port_locks(&self) -> EmuportResult<Vec<PortLockRecord>> {
        Ok(self.records.lock().locks.values().cloned().collect())
    }

    fn read_instance(&self, id: &InstanceId) -> EmuportResult<Option<InstanceDescriptor>> {
        Ok(self.records.lock().instances.get(id).cloned())
    }

    fn write_instance(&self, descriptor: &InstanceDescriptor) -> EmuportResult<()> {
        self.records
            .lock()
            .instances
            .insert(descriptor.instance_id.clone(), descriptor.clone());
        Ok(())
    }

    fn remove_instance(&self, id: &InstanceId) -> EmuportResult<bool> {
        Ok(self.records.lock().instances.remove(id).is_some())
    }

    fn list_instances(&self) -> EmuportResult<Vec<InstanceDescriptor>> {
        let mut descriptors: Vec<_> = self.records.lock().instances.values().cloned().collect();
        descriptors.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clones_share_keys_and_records() {
        let a = MemoryStore::new();
        let b = a.clone();

        let guard = a.try_lock_key("port-2222").unwrap();
        assert!(guard.is_some());
        assert!(b.try_lock_key("port-2222").unwrap().is_none());
        drop(guard);
        assert!(b.try_lock_key("port-2222").unwrap().is_some());
    }

    #[test]
    fn test_lock_key_waits() {
        let store = MemoryStore::new();
        let held = store.lock_key("instance-a").unwrap();

        let other = store.clone();
        let waiter = thread::spawn(move || {
            let _guard = other.lock_key("instance-a").unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
    }
}
