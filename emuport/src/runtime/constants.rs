//! Constants for the emuport runtime
//!
//! Centralized location for hardcoded values shared by the allocator,
//! the collector and the supervisor.

// Re-export shared constants
pub use emuport_shared::constants::{emulator, envs, limits, ports};

pub use crate::runtime::layout::{dirs, filenames};

/// Store keys for the per-key mutex primitive.
pub mod keys {
    use crate::runtime::types::InstanceId;

    pub fn port(port: u16) -> String {
        format!("port-{}", port)
    }

    pub const INSTANCE_PREFIX: &str = "instance-";

    /// Serializes allocation and mutation of a single instance.
    pub fn instance(id: &InstanceId) -> String {
        format!("{}{}", INSTANCE_PREFIX, id)
    }

    /// Inverse of [`instance`].
    pub fn parse_instance(key: &str) -> Option<InstanceId> {
        InstanceId::parse(key.strip_prefix(INSTANCE_PREFIX)?).ok()
    }
}

/// Number of attempts for an atomic replace that loses a race.
pub const WRITE_RETRIES: usize = 3;
