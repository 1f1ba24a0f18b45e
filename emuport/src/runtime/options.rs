//! Configuration for emuport.

use crate::runtime::constants::{emulator, envs as const_envs, limits, ports};
use crate::runtime::layout::{FilesystemLayout, dirs as const_dirs};
use dirs::home_dir;
use emuport_shared::errors::{EmuportError, EmuportResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Base port of each service class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortBases {
    pub ssh: u16,
    pub vnc: u16,
    pub rdp: u16,
    pub wayvnc: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            ssh: ports::SSH_BASE,
            vnc: ports::VNC_BASE,
            rdp: ports::RDP_BASE,
            wayvnc: ports::WAYVNC_BASE,
        }
    }
}

/// Runtime options.
///
/// Resolution order: built-in defaults, then `{home}/config.json`, then the
/// `EMUPORT_MAX_INSTANCES` / `EMUPORT_RETENTION_SECS` environment overrides.
/// Every field of the config file is optional.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmuportOptions {
    /// Shared home for locks and descriptors. Never read from the config
    /// file, since the config file lives inside it.
    #[serde(skip)]
    pub home_dir: PathBuf,

    /// Candidates scanned per service during auto-allocation.
    pub max_instances: u16,

    /// Age after which descriptors and orphan locks are reclaimed
    /// regardless of process liveness.
    pub retention_secs: u64,

    /// Bound on each localhost connect probe.
    pub probe_timeout_ms: u64,

    /// Supervisor liveness poll period.
    pub poll_interval_ms: u64,

    /// Time between SIGTERM and SIGKILL when the supervisor stops an emulator.
    pub stop_grace_secs: u64,

    /// Name fragments identifying emulator processes whose arguments are
    /// scanned for forwarded ports.
    pub emulator_patterns: Vec<String>,

    pub ports: PortBases,
}

impl Default for EmuportOptions {
    fn default() -> Self {
        let home_dir = std::env::var(const_envs::EMUPORT_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(const_dirs::EMUPORT_DIR);
                path
            });

        Self {
            home_dir,
            max_instances: limits::MAX_INSTANCES,
            retention_secs: limits::RETENTION_SECS,
            probe_timeout_ms: limits::PROBE_TIMEOUT_MS,
            poll_interval_ms: limits::POLL_INTERVAL_MS,
            stop_grace_secs: limits::STOP_GRACE_SECS,
            emulator_patterns: emulator::DEFAULT_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ports: PortBases::default(),
        }
    }
}

impl EmuportOptions {
    /// Defaults rooted at `home_dir`, ignoring any config file.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    /// Load options for `home_dir` (or the default home).
    pub fn load(home_dir: Option<PathBuf>) -> EmuportResult<Self> {
        let home_dir = home_dir.unwrap_or_else(|| Self::default().home_dir);
        let config_path = FilesystemLayout::new(home_dir.clone()).config_path();

        let mut options = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|e| {
                EmuportError::Config(format!("failed to read {}: {}", config_path.display(), e))
            })?;
            let parsed: EmuportOptions = serde_json::from_str(&content).map_err(|e| {
                EmuportError::Config(format!("invalid {}: {}", config_path.display(), e))
            })?;
            tracing::debug!(path = %config_path.display(), "Loaded config file");
            parsed
        } else {
            Self::default()
        };
        options.home_dir = home_dir;

        if let Some(value) = env_override::<u16>(const_envs::EMUPORT_MAX_INSTANCES)? {
            options.max_instances = value;
        }
        if let Some(value) = env_override::<u64>(const_envs::EMUPORT_RETENTION_SECS)? {
            options.retention_secs = value;
        }

        options.validate()?;
        Ok(options)
    }

    /// Reject ranges that are empty or run past the end of the port space.
    pub fn validate(&self) -> EmuportResult<()> {
        if self.max_instances == 0 {
            return Err(EmuportError::Config(
                "max_instances must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(EmuportError::Config(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        for (name, base) in [
            ("ssh", self.ports.ssh),
            ("vnc", self.ports.vnc),
            ("rdp", self.ports.rdp),
            ("wayvnc", self.ports.wayvnc),
        ] {
            if base == 0 || base as u32 + self.max_instances as u32 - 1 > u16::MAX as u32 {
                return Err(EmuportError::Config(format!(
                    "{} range {}+{} does not fit in 1-65535",
                    name, base, self.max_instances
                )));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> FilesystemLayout {
        FilesystemLayout::new(self.home_dir.clone())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> EmuportResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EmuportError::Config(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = EmuportOptions::with_home("/tmp/x");
        assert_eq!(options.max_instances, 50);
        assert_eq!(options.retention(), Duration::from_secs(3600));
        assert_eq!(options.ports.ssh, 2222);
        assert_eq!(options.ports.vnc, 5900);
        assert_eq!(options.ports.rdp, 3389);
        assert_eq!(options.ports.wayvnc, 5901);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.json"),
            r#"{"max_instances": 5, "ports": {"ssh": 40022}}"#,
        )
        .unwrap();

        let options = EmuportOptions::load(Some(temp.path().to_path_buf())).unwrap();
        assert_eq!(options.home_dir, temp.path());
        assert_eq!(options.ports.ssh, 40022);
        // Unspecified fields keep their defaults
        assert_eq!(options.ports.vnc, 5900);
        assert_eq!(options.retention_secs, 3600);
    }

    #[test]
    fn test_load_rejects_malformed_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.json"), "{not json").unwrap();

        let err = EmuportOptions::load(Some(temp.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, EmuportError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_overflowing_range() {
        let mut options = EmuportOptions::with_home("/tmp/x");
        options.ports.vnc = 65530;
        assert!(options.validate().is_err());

        options.ports.vnc = 5900;
        options.max_instances = 0;
        assert!(options.validate().is_err());
    }
}
