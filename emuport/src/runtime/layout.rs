use emuport_shared::errors::{EmuportError, EmuportResult};
use std::path::{Path, PathBuf};

use crate::runtime::types::InstanceId;

/// Directory structure constants
pub mod dirs {
    /// Base directory name for emuport data
    pub const EMUPORT_DIR: &str = ".emuport";

    /// Port arbiter files and lock records
    pub const LOCKS_DIR: &str = "locks";

    /// One descriptor file per instance
    pub const INSTANCES_DIR: &str = "instances";

    /// Allocation results handed to launched emulators
    pub const HANDOFF_DIR: &str = "handoff";

    /// Staging area for atomic replace (same filesystem as the records)
    pub const TMP_DIR: &str = "tmp";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

/// File naming patterns
pub mod filenames {
    pub const CONFIG_FILE: &str = "config.json";

    pub const LOG_FILE: &str = "emuport.log";

    pub fn port_mutex(port: u16) -> String {
        format!("port-{}.lock", port)
    }

    pub fn port_record(port: u16) -> String {
        format!("port-{}.json", port)
    }

    /// Inverse of [`port_record`].
    pub fn parse_port_record(name: &str) -> Option<u16> {
        name.strip_prefix("port-")?.strip_suffix(".json")?.parse().ok()
    }

    pub fn key_mutex(key: &str) -> String {
        format!("{}.lock", key)
    }

    /// Inverse of [`key_mutex`].
    pub fn parse_key_mutex(name: &str) -> Option<&str> {
        name.strip_suffix(".lock").filter(|key| !key.is_empty())
    }
}

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

/// Paths under the emuport home shared by every cooperating process.
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Lock directory: ~/.emuport/locks
    ///
    /// Holds `port-<n>.lock` arbiter files (flock targets, never deleted)
    /// and `port-<n>.json` lock records.
    pub fn locks_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOCKS_DIR)
    }

    pub fn port_mutex_path(&self, port: u16) -> PathBuf {
        self.locks_dir().join(filenames::port_mutex(port))
    }

    pub fn port_record_path(&self, port: u16) -> PathBuf {
        self.locks_dir().join(filenames::port_record(port))
    }

    /// Arbiter file for a non-port key (e.g. per-instance mutation).
    pub fn key_mutex_path(&self, key: &str) -> PathBuf {
        self.locks_dir().join(filenames::key_mutex(key))
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::INSTANCES_DIR)
    }

    pub fn instance_path(&self, id: &InstanceId) -> PathBuf {
        self.instances_dir().join(format!("{}.json", id))
    }

    pub fn handoff_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::HANDOFF_DIR)
    }

    pub fn handoff_path(&self, id: &InstanceId) -> PathBuf {
        self.handoff_dir().join(format!("{}.json", id))
    }

    /// Temporary directory for atomic replace: ~/.emuport/tmp
    pub fn temp_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::TMP_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_dir.join(filenames::CONFIG_FILE)
    }

    /// Initialize the filesystem structure.
    pub fn prepare(&self) -> EmuportResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.locks_dir(),
            self.instances_dir(),
            self.handoff_dir(),
            self.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                EmuportError::Storage(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }
}
