use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn tracemem(root: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tracemem");
    cmd.arg("--root").arg(root.path()).env_remove("TRACEMEM_ROOT");
    cmd
}

fn init(root: &TempDir) {
    tracemem(root)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("tracemem initialized"));
}

fn open_session(root: &TempDir) -> String {
    let output = tracemem(root)
        .args(["open", "--project", "proj", "--agent", "A", "--agent", "B"])
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

fn record(root: &TempDir, id: &str, from: &str, to: &str, kind: &str, step: &str) {
    tracemem(root)
        .args(["record", id, "--from", from, "--to", to, "--kind", kind, "--step", step])
        .assert()
        .success();
}

#[test]
fn test_cli_help() {
    let mut cmd = cargo_bin_cmd!("tracemem");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("consolidate"))
        .stdout(predicate::str::contains("recover"))
        .stdout(predicate::str::contains("patterns"))
        .stdout(predicate::str::contains("purge"));
}

#[test]
fn test_requires_init() {
    let root = TempDir::new().unwrap();
    tracemem(&root)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn test_init_twice_keeps_config() {
    let root = TempDir::new().unwrap();
    init(&root);
    assert!(root.path().join("config.toml").exists());
    tracemem(&root)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn test_session_lifecycle() {
    let root = TempDir::new().unwrap();
    init(&root);
    let id = open_session(&root);

    tracemem(&root)
        .args(["record", &id, "--from", "A", "--to", "B", "--kind", "request", "--step", "1"])
        .args(["--content", r#"{"ask":"plan"}"#])
        .assert()
        .success()
        .stdout("1\n");
    record(&root, &id, "B", "A", "response", "1");

    tracemem(&root)
        .args(["show", &id, "--records"])
        .assert()
        .success()
        .stdout(predicate::str::contains("request"))
        .stdout(predicate::str::contains(r#"{"ask":"plan"}"#));

    tracemem(&root)
        .args(["close", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:  closed"))
        .stdout(predicate::str::contains("A\u{2192}B successful handoff x1"));

    tracemem(&root)
        .args(["patterns", "--from", "A", "--to", "B"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A\u{2192}B successful handoff"));

    tracemem(&root)
        .args(["consolidate", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pattern store unchanged."));

    tracemem(&root)
        .args(["close", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("closed"));
}

#[test]
fn test_record_rejects_unknown_kind() {
    let root = TempDir::new().unwrap();
    init(&root);
    let id = open_session(&root);
    tracemem(&root)
        .args(["record", &id, "--from", "A", "--to", "B", "--kind", "gossip", "--step", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown message kind"));
}

#[test]
fn test_list_json_and_status_filter() {
    let root = TempDir::new().unwrap();
    init(&root);
    let open = open_session(&root);
    let aborted = open_session(&root);
    tracemem(&root)
        .args(["abort", &aborted, "--reason", "storage gone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Aborted: storage gone"));

    let output = tracemem(&root)
        .args(["--format", "json", "list", "--status", "open"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let sessions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = sessions
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![open.as_str()]);
}

#[test]
fn test_recover_sweep_and_purge_preview() {
    let root = TempDir::new().unwrap();
    init(&root);
    let id = open_session(&root);
    record(&root, &id, "A", "B", "notification", "1");

    // A torn frame left behind by a crash.
    let trace = root.path().join("sessions").join(&id).join("trace.log");
    let mut bytes = std::fs::read(&trace).unwrap();
    bytes.extend_from_slice(&[9, 0, 0, 0, 1]);
    std::fs::write(&trace, bytes).unwrap();

    tracemem(&root)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("recovered through seq 1, discarded 5 byte(s)"));
    tracemem(&root)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("clean through seq 1"));

    tracemem(&root)
        .args(["abort", &id])
        .assert()
        .success();
    tracemem(&root)
        .args(["purge", "--older-than", "0h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would purge 1 session(s)"))
        .stderr(predicate::str::contains("--yes"));
    assert!(root.path().join("sessions").join(&id).exists());
}

#[test]
fn test_stats_json() {
    let root = TempDir::new().unwrap();
    init(&root);
    let id = open_session(&root);
    record(&root, &id, "A", "B", "request", "1");
    record(&root, &id, "B", "A", "error", "2");
    tracemem(&root).args(["close", &id]).assert().success();

    let output = tracemem(&root)
        .args(["--format", "json", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total_sessions"], 1);
    assert_eq!(stats["total_records"], 2);
    assert_eq!(stats["consolidation"]["completed"], 1);
    assert_eq!(stats["observations_by_outcome"]["unresolved"], 1);
}
