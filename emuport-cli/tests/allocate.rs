use predicates::prelude::*;

mod common;

#[test]
fn test_allocate_prints_exports() {
    let mut ctx = common::emuport();
    ctx.cmd
        .args(["allocate", "--instance", "alloc-basic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("export INSTANCE_ID=alloc-basic"))
        .stdout(predicate::str::contains("export ALLOCATED_SSH_PORT="))
        .stdout(predicate::str::contains("ALLOCATED_VNC_PORT").not());
}

#[test]
fn test_allocate_json_with_optional_services() {
    let ctx = common::emuport();
    let stdout = ctx.allocate(&[
        "--instance",
        "alloc-json",
        "--vnc",
        "--wayvnc",
        "--format",
        "json",
    ]);

    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["instance_id"], "alloc-json");
    assert!(value["ssh_port"].as_u64().is_some());
    assert!(value["vnc_port"].as_u64().is_some());
    assert!(value["wayvnc_port"].as_u64().is_some());
    assert_ne!(value["vnc_port"], value["wayvnc_port"]);
    assert!(value.get("rdp_port").is_none());
}

#[test]
fn test_allocate_twice_never_shares_ports() {
    let ctx = common::emuport();
    let first = ctx.allocate(&["--instance", "one", "--format", "json"]);
    let second = ctx.allocate(&["--instance", "two", "--format", "json"]);

    let first: serde_json::Value = serde_json::from_str(&first).unwrap();
    let second: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_ne!(first["ssh_port"], second["ssh_port"]);
}

#[test]
fn test_allocate_explicit_port_taken() {
    let ctx = common::emuport();
    let port = (common::SSH_BASE + 5).to_string();
    ctx.allocate(&["--instance", "holder", "--ssh", &port]);

    ctx.new_cmd()
        .args(["allocate", "--instance", "contender", "--ssh", &port])
        .assert()
        .failure()
        .stderr(predicate::str::contains("allocation failed"))
        .stderr(predicate::str::contains("auto"));
}

#[test]
fn test_allocate_conflicting_ports_rejected() {
    let mut ctx = common::emuport();
    ctx.cmd
        .args(["allocate", "--ssh", "45000", "--vnc", "45000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("distinct ports"));

    assert!(
        !ctx.home.path().join("instances").exists()
            || std::fs::read_dir(ctx.home.path().join("instances"))
                .unwrap()
                .next()
                .is_none()
    );
}

#[test]
fn test_allocate_invalid_port_value() {
    let mut ctx = common::emuport();
    ctx.cmd
        .args(["allocate", "--ssh", "not-a-port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("auto"));
}
