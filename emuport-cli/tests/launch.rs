use predicates::prelude::*;

mod common;

#[test]
fn test_launch_exports_allocation_to_emulator() {
    let mut ctx = common::emuport();
    let script = format!(
        "test \"$ALLOCATED_SSH_PORT\" = {} && test -n \"$ALLOCATED_VNC_PORT\" \
         && test -z \"$ALLOCATED_RDP_PORT\" && test -f \"$EMUPORT_HANDOFF\" \
         && test \"$1\" = \"fwd:$ALLOCATED_SSH_PORT\"",
        common::SSH_BASE
    );
    ctx.cmd
        .args(["launch", "--instance", "launched", "--vnc", "--", "sh", "-c"])
        .arg(&script)
        .arg("sh")
        .arg("fwd:{ssh}")
        .assert()
        .success();

    // Everything is released once the emulator exits
    ctx.new_cmd()
        .args(["list", "--all", "--no-sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("launched").not());
}

#[test]
fn test_launch_reports_emulator_failure() {
    let ctx = common::emuport();
    ctx.new_cmd()
        .args(["launch", "--instance", "failing", "--", "sh", "-c", "exit 7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("status 7"));

    let stdout = ctx.allocate(&["--instance", "after"]);
    assert!(stdout.contains(&format!("ALLOCATED_SSH_PORT={}", common::SSH_BASE)));
}

#[test]
fn test_launch_missing_binary_releases_ports() {
    let ctx = common::emuport();
    ctx.new_cmd()
        .args(["launch", "--instance", "nobin", "--", "/nonexistent/emulator"])
        .assert()
        .failure();

    ctx.new_cmd()
        .args(["list", "--all", "--no-sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nobin").not());
}

#[test]
fn test_completion_bash() {
    let mut ctx = common::emuport();
    ctx.cmd
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("emuport"));
}
