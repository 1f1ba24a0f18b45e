//! Shared constants
//!
//! These values must be identical in every process that touches the lock
//! and instance directories, otherwise concurrent launchers disagree on
//! which ports belong to which range.

/// Base ports for each service class.
///
/// Auto-allocation scans upward from these values.
pub mod ports {
    pub const SSH_BASE: u16 = 2222;
    pub const VNC_BASE: u16 = 5900;
    pub const RDP_BASE: u16 = 3389;
    /// Sits directly above VNC_BASE, so the two ranges overlap; the
    /// lock set keeps them disjoint.
    pub const WAYVNC_BASE: u16 = 5901;
}

/// Allocation and reclamation limits
pub mod limits {
    /// Number of sequential candidates scanned per service.
    pub const MAX_INSTANCES: u16 = 50;

    /// Descriptors and orphan locks older than this are reclaimed regardless
    /// of liveness.
    pub const RETENTION_SECS: u64 = 3600;

    /// Upper bound on a single localhost connect probe.
    pub const PROBE_TIMEOUT_MS: u64 = 1000;

    /// Supervisor liveness poll period.
    pub const POLL_INTERVAL_MS: u64 = 1000;

    /// Time an emulator gets between SIGTERM and SIGKILL.
    pub const STOP_GRACE_SECS: u64 = 5;
}

/// Handoff values exported to the launched emulator process.
pub mod envs {
    pub const ALLOCATED_SSH_PORT: &str = "ALLOCATED_SSH_PORT";
    pub const ALLOCATED_VNC_PORT: &str = "ALLOCATED_VNC_PORT";
    pub const ALLOCATED_RDP_PORT: &str = "ALLOCATED_RDP_PORT";
    pub const ALLOCATED_WAYVNC_PORT: &str = "ALLOCATED_WAYVNC_PORT";
    pub const INSTANCE_ID: &str = "INSTANCE_ID";

    /// Path of the serialized allocation result.
    pub const EMUPORT_HANDOFF: &str = "EMUPORT_HANDOFF";

    pub const EMUPORT_HOME: &str = "EMUPORT_HOME";
    pub const EMUPORT_MAX_INSTANCES: &str = "EMUPORT_MAX_INSTANCES";
    pub const EMUPORT_RETENTION_SECS: &str = "EMUPORT_RETENTION_SECS";
}

/// Emulator process identity
pub mod emulator {
    /// Sentinel stored in place of the emulator pid until the supervisor
    /// records the real one.
    pub const PENDING: &str = "PENDING";

    /// Process name fragments that identify an emulator when scanning
    /// command lines for forwarded ports.
    pub const DEFAULT_PATTERNS: &[&str] = &["qemu-system"];
}
