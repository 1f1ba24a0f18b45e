use predicates::prelude::*;

mod common;

#[test]
fn test_list_header() {
    let mut ctx = common::emuport();
    ctx.cmd
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("ID"))
        .stdout(predicate::str::contains("STATUS"))
        .stdout(predicate::str::contains("SSH"));
}

#[test]
fn test_list_shows_starting_allocation() {
    let ctx = common::emuport();
    ctx.allocate(&["--instance", "listed", "--vnc"]);

    ctx.new_cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("listed"))
        .stdout(predicate::str::contains("STARTING"))
        .stdout(predicate::str::contains("PENDING"));
}

#[test]
fn test_list_json() {
    let ctx = common::emuport();
    ctx.allocate(&["--instance", "as-json"]);

    let output = ctx
        .new_cmd()
        .args(["list", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = value.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["instance_id"], "as-json");
    assert_eq!(rows[0]["status"], "STARTING");
}

#[test]
fn test_list_sweeps_dead_owner() {
    let ctx = common::emuport();
    // An exited child stands in for a launcher that died without cleaning up
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id().to_string();
    child.wait().unwrap();

    ctx.allocate(&["--instance", "orphaned", "--owner-pid", &dead_pid]);

    ctx.new_cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("orphaned").not());
}

#[test]
fn test_list_alias_ls() {
    let mut ctx = common::emuport();
    ctx.cmd.arg("ls").assert().success();
}
