//! Filesystem-backed store.
//!
//! Records are JSON files written to `{home}/tmp` and renamed into place,
//! so a reader in another process sees either the previous record or the
//! new one, never a torn write. Key mutexes are flock arbiter files in
//! `{home}/locks`.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use emuport_shared::errors::{EmuportError, EmuportResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{KeyGuard, Store};
use crate::lock::FileMutex;
use crate::runtime::constants::WRITE_RETRIES;
use crate::runtime::layout::{FilesystemLayout, filenames};
use crate::runtime::types::{InstanceDescriptor, InstanceId, PortLockRecord};

impl KeyGuard for FileMutex {
    fn discard(&self) -> EmuportResult<bool> {
        self.unlink()
    }
}

#[derive(Debug, Clone)]
pub struct FsStore {
    layout: FilesystemLayout,
}

impl FsStore {
    /// Open the store, creating its directories if needed.
    pub fn open(layout: FilesystemLayout) -> EmuportResult<Self> {
        layout.prepare()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.layout
    }

    /// Atomically replace `final_path` with `value`.
    ///
    /// A rename can lose a race with a concurrent cleanup of the staging
    /// directory; such writes are retried with a fresh temp file.
    fn write_record<T: Serialize>(&self, final_path: &Path, value: &T) -> EmuportResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;

        let mut last_err = None;
        for attempt in 1..=WRITE_RETRIES {
            match self.try_replace(final_path, &bytes) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::debug!(
                        path = %final_path.display(),
                        attempt,
                        error = %err,
                        "Atomic replace failed, retrying"
                    );
                    self.layout.prepare()?;
                    last_err = Some(err);
                }
            }
        }

        Err(EmuportError::Storage(format!(
            "failed to write {} after {} attempts: {}",
            final_path.display(),
            WRITE_RETRIES,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn try_replace(&self, final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut staged = tempfile::NamedTempFile::new_in(self.layout.temp_dir())?;
        staged.write_all(bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(final_path).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_raw(&self, path: &Path) -> EmuportResult<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EmuportError::Storage(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn read_record<T: DeserializeOwned>(&self, path: &Path) -> EmuportResult<Option<T>> {
        let Some(content) = self.read_raw(path)? else {
            return Ok(None);
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            EmuportError::Storage(format!("corrupt record {}: {}", path.display(), e))
        })
    }

    fn remove_record(&self, path: &Path) -> EmuportResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EmuportError::Storage(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// JSON files in `dir` accepted by `select`, skipping corrupt ones.
    fn list_records<T: DeserializeOwned>(
        &self,
        dir: &Path,
        select: impl Fn(&str) -> bool,
    ) -> EmuportResult<Vec<T>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EmuportError::Storage(format!(
                    "failed to list {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !select(name) {
                continue;
            }
            match self.read_record::<T>(&entry.path()) {
                Ok(Some(record)) => records.push(record),
                // Removed between read_dir and read
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

impl Store for FsStore {
    fn try_lock_key(&self, key: &str) -> EmuportResult<Option<Box<dyn KeyGuard>>> {
        let guard = FileMutex::try_acquire(&self.layout.key_mutex_path(key))?;
        Ok(guard.map(|g| Box::new(g) as Box<dyn KeyGuard>))
    }

    fn lock_key(&self, key: &str) -> EmuportResult<Box<dyn KeyGuard>> {
        let guard = FileMutex::acquire(&self.layout.key_mutex_path(key))?;
        Ok(Box::new(guard))
    }

    fn idle_keys(&self, prefix: &str, cutoff: DateTime<Utc>) -> EmuportResult<Vec<String>> {
        let dir = self.layout.locks_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EmuportError::Storage(format!(
                    "failed to list {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(filenames::parse_key_mutex) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            // Arbiters are never written, so mtime is their creation time
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if DateTime::<Utc>::from(modified) <= cutoff {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read_port_lock(&self, port: u16) -> EmuportResult<Option<PortLockRecord>> {
        let path = self.layout.port_record_path(port);
        let Some(content) = self.read_raw(&path)? else {
            return Ok(None);
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            // A lock record nobody can parse protects nothing
            Err(e) => {
                tracing::warn!(port, error = %e, "Ignoring corrupt lock record");
                Ok(None)
            }
        }
    }

    fn write_port_lock(&self, record: &PortLockRecord) -> EmuportResult<()> {
        self.write_record(&self.layout.port_record_path(record.port), record)
    }

    fn remove_port_lock(&self, port: u16) -> EmuportResult<bool> {
        self.remove_record(&self.layout.port_record_path(port))
    }

    fn list_port_locks(&self) -> EmuportResult<Vec<PortLockRecord>> {
        let mut records: Vec<PortLockRecord> = self.list_records(&self.layout.locks_dir(), |name| {
            filenames::parse_port_record(name).is_some()
        })?;
        records.sort_by_key(|r| r.port);
        Ok(records)
    }

    fn read_instance(&self, id: &InstanceId) -> EmuportResult<Option<InstanceDescriptor>> {
        self.read_record(&self.layout.instance_path(id))
    }

    fn write_instance(&self, descriptor: &InstanceDescriptor) -> EmuportResult<()> {
        self.write_record(
            &self.layout.instance_path(&descriptor.instance_id),
            descriptor,
        )
    }

    fn remove_instance(&self, id: &InstanceId) -> EmuportResult<bool> {
        self.remove_record(&self.layout.instance_path(id))
    }

    fn list_instances(&self) -> EmuportResult<Vec<InstanceDescriptor>> {
        let mut descriptors: Vec<InstanceDescriptor> =
            self.list_records(&self.layout.instances_dir(), |name| name.ends_with(".json"))?;
        descriptors.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(descriptors)
    }
}
