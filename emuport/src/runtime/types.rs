//! Core data types for port allocation and instance tracking.

use chrono::{DateTime, Utc};
use emuport_shared::constants::{emulator, envs};
use emuport_shared::errors::{EmuportError, EmuportResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::runtime::options::PortBases;

// ============================================================================
// INSTANCE ID
// ============================================================================

/// Unique identifier of one emulator launch.
///
/// Generated ids have the form `<distro>_<unix-seconds>_<suffix>`. Any id
/// made of ASCII alphanumerics, `.`, `_` and `-` is accepted so that ids
/// chosen by the menu can be used as file names directly.
///
/// # Example
///
/// ```
/// use emuport::runtime::types::InstanceId;
///
/// let id = InstanceId::generate("jessie");
/// assert!(id.as_str().starts_with("jessie_"));
/// assert!(InstanceId::parse("../etc").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Length of the random suffix appended by [`InstanceId::generate`].
    pub const SUFFIX_LENGTH: usize = 6;

    const MAX_LENGTH: usize = 128;

    /// Generate a fresh id for a launch of `distro`.
    ///
    /// The name is sanitized and shortened so the result always passes
    /// [`InstanceId::parse`].
    pub fn generate(distro: &str) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(Self::SUFFIX_LENGTH)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        let tail = format!("_{}_{}", Utc::now().timestamp(), suffix);

        // Only ASCII survives the mapping, so byte truncation is safe
        let mut name: String = distro
            .chars()
            .map(|c| if Self::is_valid_char(c) { c } else { '-' })
            .skip_while(|c| *c == '.')
            .collect();
        name.truncate(Self::MAX_LENGTH.saturating_sub(tail.len()));
        if name.is_empty() {
            name = "instance".to_string();
        }

        Self(name + &tail)
    }

    /// Parse an id supplied by a caller.
    pub fn parse(s: &str) -> EmuportResult<Self> {
        if s.is_empty() || s.len() > Self::MAX_LENGTH {
            return Err(EmuportError::InvalidArgument(format!(
                "instance id must be 1-{} characters, got {}",
                Self::MAX_LENGTH,
                s.len()
            )));
        }
        if s.starts_with('.') || !s.chars().all(Self::is_valid_char) {
            return Err(EmuportError::InvalidArgument(format!(
                "instance id '{}' may only contain letters, digits, '.', '_' and '-'",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
    }
}

impl TryFrom<String> for InstanceId {
    type Error = EmuportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl std::str::FromStr for InstanceId {
    type Err = EmuportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

// ============================================================================
// SERVICE CLASSES
// ============================================================================

/// A forwarded service with its own base port and auto-allocation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Ssh,
    Vnc,
    Rdp,
    WayVnc,
}

impl ServiceKind {
    /// Allocation order. SSH is always first and always required.
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Ssh,
        ServiceKind::Vnc,
        ServiceKind::Rdp,
        ServiceKind::WayVnc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Ssh => "ssh",
            ServiceKind::Vnc => "vnc",
            ServiceKind::Rdp => "rdp",
            ServiceKind::WayVnc => "wayvnc",
        }
    }

    /// Name of the handoff variable carrying this service's port.
    pub fn env_var(&self) -> &'static str {
        match self {
            ServiceKind::Ssh => envs::ALLOCATED_SSH_PORT,
            ServiceKind::Vnc => envs::ALLOCATED_VNC_PORT,
            ServiceKind::Rdp => envs::ALLOCATED_RDP_PORT,
            ServiceKind::WayVnc => envs::ALLOCATED_WAYVNC_PORT,
        }
    }

    pub fn base_port(&self, bases: &PortBases) -> u16 {
        match self {
            ServiceKind::Ssh => bases.ssh,
            ServiceKind::Vnc => bases.vnc,
            ServiceKind::Rdp => bases.rdp,
            ServiceKind::WayVnc => bases.wayvnc,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = EmuportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(ServiceKind::Ssh),
            "vnc" => Ok(ServiceKind::Vnc),
            "rdp" => Ok(ServiceKind::Rdp),
            "wayvnc" => Ok(ServiceKind::WayVnc),
            other => Err(EmuportError::InvalidArgument(format!(
                "unknown service '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// PORT REQUESTS
// ============================================================================

/// How a single service's port should be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortRequest {
    /// Scan upward from the service's base port.
    #[default]
    Auto,
    /// Use exactly this port or fail.
    Port(u16),
}

impl PortRequest {
    pub fn explicit(&self) -> Option<u16> {
        match self {
            PortRequest::Auto => None,
            PortRequest::Port(port) => Some(*port),
        }
    }
}

impl std::str::FromStr for PortRequest {
    type Err = EmuportError;

    /// Accepts `auto` (any case) or a decimal port in `1..=65535`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(PortRequest::Auto);
        }
        match s.parse::<u16>() {
            Ok(0) | Err(_) => Err(EmuportError::InvalidArgument(format!(
                "port must be 'auto' or a number between 1 and 65535, got '{}'",
                s
            ))),
            Ok(port) => Ok(PortRequest::Port(port)),
        }
    }
}

impl fmt::Display for PortRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRequest::Auto => f.write_str("auto"),
            PortRequest::Port(port) => write!(f, "{}", port),
        }
    }
}

// ============================================================================
// EMULATOR PID
// ============================================================================

/// Emulator process id as recorded in a descriptor.
///
/// Serialized as the string `"PENDING"` or a bare integer so the records
/// stay readable by the shell launchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPid", into = "RawPid")]
pub enum EmulatorPid {
    Pending,
    Running(u32),
}

impl EmulatorPid {
    pub fn pid(&self) -> Option<u32> {
        match self {
            EmulatorPid::Pending => None,
            EmulatorPid::Running(pid) => Some(*pid),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EmulatorPid::Pending)
    }
}

impl fmt::Display for EmulatorPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorPid::Pending => f.write_str(emulator::PENDING),
            EmulatorPid::Running(pid) => write!(f, "{}", pid),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPid {
    Pid(u32),
    Text(String),
}

impl TryFrom<RawPid> for EmulatorPid {
    type Error = String;

    fn try_from(raw: RawPid) -> Result<Self, Self::Error> {
        match raw {
            RawPid::Pid(pid) => Ok(EmulatorPid::Running(pid)),
            RawPid::Text(text) if text == emulator::PENDING => Ok(EmulatorPid::Pending),
            RawPid::Text(text) => text
                .parse::<u32>()
                .map(EmulatorPid::Running)
                .map_err(|_| format!("invalid emulator pid '{}'", text)),
        }
    }
}

impl From<EmulatorPid> for RawPid {
    fn from(pid: EmulatorPid) -> Self {
        match pid {
            EmulatorPid::Pending => RawPid::Text(emulator::PENDING.to_string()),
            EmulatorPid::Running(pid) => RawPid::Pid(pid),
        }
    }
}

// ============================================================================
// DURABLE RECORDS
// ============================================================================

/// Lock record stored next to a port's arbiter file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLockRecord {
    pub port: u16,
    pub instance_id: InstanceId,
    pub acquired_at: DateTime<Utc>,
    pub owner_pid: u32,
}

/// Durable description of one running or starting instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub instance_id: InstanceId,
    pub ssh_port: u16,
    #[serde(default)]
    pub vnc_port: Option<u16>,
    #[serde(default)]
    pub rdp_port: Option<u16>,
    #[serde(default)]
    pub wayvnc_port: Option<u16>,
    /// Exactly the set of populated port fields.
    pub allocated_ports: BTreeSet<u16>,
    pub created_at: DateTime<Utc>,
    pub emulator_pid: EmulatorPid,
    /// Process that performed the allocation (menu or launcher).
    pub owner_pid: u32,
    /// Process running the supervisor, recorded together with the emulator pid.
    #[serde(default)]
    pub supervisor_pid: Option<u32>,
}

impl InstanceDescriptor {
    /// Build a freshly allocated descriptor with a pending emulator.
    pub fn new(
        instance_id: InstanceId,
        ports: &[(ServiceKind, u16)],
        owner_pid: u32,
    ) -> EmuportResult<Self> {
        let port_of = |kind: ServiceKind| {
            ports
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, port)| *port)
        };

        let ssh_port = port_of(ServiceKind::Ssh).ok_or_else(|| {
            EmuportError::InvalidArgument(format!("instance {} has no ssh port", instance_id))
        })?;

        Ok(Self {
            instance_id,
            ssh_port,
            vnc_port: port_of(ServiceKind::Vnc),
            rdp_port: port_of(ServiceKind::Rdp),
            wayvnc_port: port_of(ServiceKind::WayVnc),
            allocated_ports: ports.iter().map(|(_, port)| *port).collect(),
            created_at: Utc::now(),
            emulator_pid: EmulatorPid::Pending,
            owner_pid,
            supervisor_pid: None,
        })
    }

    pub fn port(&self, kind: ServiceKind) -> Option<u16> {
        match kind {
            ServiceKind::Ssh => Some(self.ssh_port),
            ServiceKind::Vnc => self.vnc_port,
            ServiceKind::Rdp => self.rdp_port,
            ServiceKind::WayVnc => self.wayvnc_port,
        }
    }

    /// Populated services in allocation order.
    pub fn services(&self) -> Vec<(ServiceKind, u16)> {
        ServiceKind::ALL
            .iter()
            .filter_map(|kind| self.port(*kind).map(|port| (*kind, port)))
            .collect()
    }

    /// Seconds since the descriptor was created (zero if the clock went back).
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_seconds().max(0) as u64
    }
}

// ============================================================================
// REPORTING
// ============================================================================

/// Observed lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    /// Ports reserved, emulator not recorded yet, owner still alive.
    Starting,
    /// Emulator process alive.
    Running,
    /// Neither the emulator nor a pending owner is alive.
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopped => "STOPPED",
        }
    }

    /// Starting or running.
    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceStatus::Stopped)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot row returned by `list_instances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub owner_pid: u32,
    pub emulator_pid: EmulatorPid,
    pub ssh_port: u16,
    pub vnc_port: Option<u16>,
    pub rdp_port: Option<u16>,
    pub wayvnc_port: Option<u16>,
    pub created_at: DateTime<Utc>,
}

impl InstanceInfo {
    pub fn from_descriptor(descriptor: &InstanceDescriptor, status: InstanceStatus) -> Self {
        Self {
            instance_id: descriptor.instance_id.clone(),
            status,
            owner_pid: descriptor.owner_pid,
            emulator_pid: descriptor.emulator_pid,
            ssh_port: descriptor.ssh_port,
            vnc_port: descriptor.vnc_port,
            rdp_port: descriptor.rdp_port,
            wayvnc_port: descriptor.wayvnc_port,
            created_at: descriptor.created_at,
        }
    }
}

/// Usage of one service class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub service: ServiceKind,
    pub active: usize,
    pub range_start: u16,
    pub range_end: u16,
}

/// Result of `port_usage_summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUsageSummary {
    pub instances: usize,
    pub locks_held: usize,
    pub services: Vec<ServiceUsage>,
}

impl PortUsageSummary {
    pub fn active(&self, service: ServiceKind) -> usize {
        self.services
            .iter()
            .find(|usage| usage.service == service)
            .map(|usage| usage.active)
            .unwrap_or(0)
    }
}

/// Outcome of `release_instance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRelease {
    /// Locks freed and descriptor deleted.
    Released { ports: Vec<u16> },
    /// No descriptor exists for the instance.
    NotFound,
    /// Another live process owns the instance; nothing was touched.
    HeldByOther { owner_pid: u32 },
}
