use predicates::prelude::*;

mod common;

#[test]
fn test_summary_table() {
    let ctx = common::emuport();
    ctx.allocate(&["--instance", "sum-a", "--vnc"]);

    ctx.new_cmd()
        .arg("summary")
        .assert()
        .success()
        .stdout(predicate::str::contains("SERVICE"))
        .stdout(predicate::str::contains(format!(
            "{}-{}",
            common::SSH_BASE,
            common::SSH_BASE + 7
        )))
        .stdout(predicate::str::contains("1 instance(s), 2 port lock(s) held"));
}

#[test]
fn test_summary_json() {
    let ctx = common::emuport();
    ctx.allocate(&["--instance", "sum-b", "--rdp"]);

    let output = ctx
        .new_cmd()
        .args(["summary", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["instances"], 1);
    assert_eq!(summary["locks_held"], 2);

    let services = summary["services"].as_array().unwrap();
    let rdp = services.iter().find(|s| s["service"] == "rdp").unwrap();
    assert_eq!(rdp["active"], 1);
    assert_eq!(rdp["range_start"], common::RDP_BASE);
}
