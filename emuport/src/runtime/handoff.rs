//! Typed allocation result handed to a launched emulator.
//!
//! The child receives the result three ways: placeholder substitution in
//! its arguments, the `ALLOCATED_*_PORT` / `INSTANCE_ID` environment
//! values, and a JSON file whose path is passed as `EMUPORT_HANDOFF`.

use std::io::Write;
use std::path::Path;

use emuport_shared::errors::{EmuportError, EmuportResult};
use serde::{Deserialize, Serialize};

use crate::runtime::constants::envs;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::types::{InstanceDescriptor, InstanceId, ServiceKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub instance_id: InstanceId,
    pub ssh_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnc_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdp_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wayvnc_port: Option<u16>,
}

impl AllocationResult {
    pub fn from_descriptor(descriptor: &InstanceDescriptor) -> Self {
        Self {
            instance_id: descriptor.instance_id.clone(),
            ssh_port: descriptor.ssh_port,
            vnc_port: descriptor.vnc_port,
            rdp_port: descriptor.rdp_port,
            wayvnc_port: descriptor.wayvnc_port,
        }
    }

    pub fn port(&self, kind: ServiceKind) -> Option<u16> {
        match kind {
            ServiceKind::Ssh => Some(self.ssh_port),
            ServiceKind::Vnc => self.vnc_port,
            ServiceKind::Rdp => self.rdp_port,
            ServiceKind::WayVnc => self.wayvnc_port,
        }
    }

    /// Environment values for the child. Disabled services are omitted.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![(envs::INSTANCE_ID, self.instance_id.to_string())];
        for kind in ServiceKind::ALL {
            if let Some(port) = self.port(kind) {
                vars.push((kind.env_var(), port.to_string()));
            }
        }
        vars
    }

    /// Replace `{ssh}`, `{vnc}`, `{rdp}`, `{wayvnc}` and `{instance}` in
    /// `arg`. Placeholders of disabled services are left as they are.
    pub fn substitute(&self, arg: &str) -> String {
        let mut out = arg.replace("{instance}", self.instance_id.as_str());
        for kind in ServiceKind::ALL {
            if let Some(port) = self.port(kind) {
                out = out.replace(&format!("{{{}}}", kind.as_str()), &port.to_string());
            }
        }
        out
    }

    /// Rebuild the result from the environment of a launched child.
    ///
    /// Prefers the handoff file when `EMUPORT_HANDOFF` is set.
    pub fn from_env() -> EmuportResult<Self> {
        if let Some(path) = std::env::var_os(envs::EMUPORT_HANDOFF) {
            return Self::read_from(Path::new(&path));
        }

        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let port = |name: &str| -> EmuportResult<Option<u16>> {
            var(name)
                .map(|v| {
                    v.parse::<u16>().map_err(|_| {
                        EmuportError::InvalidArgument(format!("{}={} is not a port", name, v))
                    })
                })
                .transpose()
        };

        let instance_id = var(envs::INSTANCE_ID)
            .ok_or_else(|| EmuportError::NotFound(format!("{} is not set", envs::INSTANCE_ID)))?;
        let ssh_port = port(envs::ALLOCATED_SSH_PORT)?.ok_or_else(|| {
            EmuportError::NotFound(format!("{} is not set", envs::ALLOCATED_SSH_PORT))
        })?;

        Ok(Self {
            instance_id: InstanceId::parse(&instance_id)?,
            ssh_port,
            vnc_port: port(envs::ALLOCATED_VNC_PORT)?,
            rdp_port: port(envs::ALLOCATED_RDP_PORT)?,
            wayvnc_port: port(envs::ALLOCATED_WAYVNC_PORT)?,
        })
    }

    /// Write the handoff file atomically, staging in `layout.temp_dir()`.
    pub fn write(&self, layout: &FilesystemLayout) -> EmuportResult<std::path::PathBuf> {
        let path = layout.handoff_path(&self.instance_id);
        let bytes = serde_json::to_vec_pretty(self)?;

        let mut staged = tempfile::NamedTempFile::new_in(layout.temp_dir())?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(
            instance_id = %self.instance_id,
            path = %path.display(),
            "Wrote handoff file"
        );
        Ok(path)
    }

    pub fn read_from(path: &Path) -> EmuportResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EmuportError::Storage(format!("failed to read handoff {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Delete the handoff file of `id`, if any.
pub fn remove(layout: &FilesystemLayout, id: &InstanceId) {
    let path = layout.handoff_path(id);
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::trace!(instance_id = %id, "Removed handoff file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            instance_id = %id,
            path = %path.display(),
            error = %e,
            "Failed to remove handoff file"
        ),
    }
}
