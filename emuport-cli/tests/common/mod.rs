#![allow(dead_code)]

use assert_cmd::Command;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

pub const SSH_BASE: u16 = 42222;
pub const VNC_BASE: u16 = 45900;
pub const RDP_BASE: u16 = 43389;
pub const WAYVNC_BASE: u16 = 45901;

/// Each test gets its own home, so tests never contend for locks.
pub struct TestContext {
    pub cmd: Command,
    pub home: TempDir,
}

impl TestContext {
    /// Another command sharing this context's home.
    pub fn new_cmd(&self) -> Command {
        command_for(self.home.path())
    }

    /// Allocate with the default flags plus `extra`, returning stdout.
    pub fn allocate(&self, extra: &[&str]) -> String {
        let output = self
            .new_cmd()
            .arg("allocate")
            .args(extra)
            .output()
            .expect("failed to run emuport allocate");
        assert!(
            output.status.success(),
            "allocate failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

fn command_for(home: &Path) -> Command {
    let bin_path = env!("CARGO_BIN_EXE_emuport");
    let mut cmd = Command::new(bin_path);
    cmd.timeout(Duration::from_secs(60));
    cmd.arg("--home").arg(home);
    cmd.env_remove("EMUPORT_HOME")
        .env_remove("EMUPORT_MAX_INSTANCES")
        .env_remove("EMUPORT_RETENTION_SECS")
        .env_remove("RUST_LOG");
    cmd
}

pub fn emuport() -> TestContext {
    let home = TempDir::new().expect("failed to create test home");

    // High bases keep the tests clear of real emulators on the host
    let config = format!(
        r#"{{
  "max_instances": 8,
  "emulator_patterns": [],
  "ports": {{ "ssh": {SSH_BASE}, "vnc": {VNC_BASE}, "rdp": {RDP_BASE}, "wayvnc": {WAYVNC_BASE} }}
}}"#
    );
    std::fs::write(home.path().join("config.json"), config).expect("failed to write config");

    let cmd = command_for(home.path());
    TestContext { cmd, home }
}
