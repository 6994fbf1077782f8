#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nphies(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nphies").unwrap();
    cmd.current_dir(dir.path())
        .env("NPHIES_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_with(dir: &TempDir, endpoint: &str) {
    nphies(dir)
        .args(["init", "--endpoint", endpoint])
        .assert()
        .success();
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn claim_response(correlation: &str) -> String {
    serde_json::json!({
        "resourceType": "Bundle",
        "entry": [
            { "resource": {
                "resourceType": "ClaimResponse",
                "outcome": "complete",
                "request": { "identifier": { "value": correlation } }
            } }
        ]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// nphies init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_database() {
    let dir = TempDir::new().unwrap();
    nphies(&dir)
        .args(["init", "--endpoint", "https://exchange.test/poll"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .nphies/config.yaml"));

    assert!(dir.path().join(".nphies/config.yaml").exists());
    assert!(dir.path().join(".nphies/poller.db").exists());
    let yaml = std::fs::read_to_string(dir.path().join(".nphies/config.yaml")).unwrap();
    assert!(yaml.contains("https://exchange.test/poll"));
}

#[test]
fn init_requires_endpoint_the_first_time() {
    let dir = TempDir::new().unwrap();
    nphies(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--endpoint"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .nphies/config.yaml"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    nphies(&dir)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// nphies poll / logs / log
// ---------------------------------------------------------------------------

#[test]
fn poll_matches_a_registered_record() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/poll")
        .with_status(200)
        .with_body(claim_response("req-9"))
        .create();

    let dir = TempDir::new().unwrap();
    init_with(&dir, &format!("{}/poll", server.url()));
    nphies(&dir)
        .args(["records", "add", "claim_submissions", "--correlation-id", "req-9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added claim_submissions #1"));

    let run = json_stdout(nphies(&dir).args(["--json", "poll"]));
    mock.assert();
    assert_eq!(run["success"], true);
    assert_eq!(run["stats"]["received"], 1);
    assert_eq!(run["stats"]["matched"], 1);
    assert_eq!(run["messages"][0]["matchedRecordId"], 1);
    assert_eq!(run["messages"][0]["matchStrategy"], "direct_correlation");

    let records = json_stdout(nphies(&dir).args(["-j", "records", "list", "claim_submissions"]));
    assert!(records[0]["lastFingerprint"].is_string());
    assert!(records[0]["responsePayload"].is_object());

    let page = json_stdout(nphies(&dir).args(["-j", "logs"]));
    assert_eq!(page["total"], 1);
    assert_eq!(page["logs"][0]["status"], "success");

    let detail = json_stdout(nphies(&dir).args(["-j", "log", "1"]));
    assert_eq!(detail["messages"].as_array().unwrap().len(), 1);
    assert_eq!(detail["processingSummary"]["ClaimResponse"]["matched"], 1);

    let stats = json_stdout(nphies(&dir).args(["-j", "stats"]));
    assert_eq!(stats["totalPolls"], 1);
    assert_eq!(stats["matchRatePercent"], 100.0);
}

#[test]
fn empty_exchange_is_a_successful_poll() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/poll")
        .with_status(200)
        .with_body(r#"{"resourceType":"Bundle","entry":[]}"#)
        .create();

    let dir = TempDir::new().unwrap();
    init_with(&dir, &format!("{}/poll", server.url()));
    nphies(&dir)
        .arg("poll")
        .assert()
        .success()
        .stdout(predicate::str::contains("[no_messages]"));
}

#[test]
fn failed_poll_exits_nonzero_and_is_logged() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/poll")
        .with_status(401)
        .with_body("denied")
        .create();

    let dir = TempDir::new().unwrap();
    init_with(&dir, &format!("{}/poll", server.url()));
    nphies(&dir)
        .arg("poll")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ended with status error"));

    let page = json_stdout(nphies(&dir).args(["-j", "logs"]));
    assert_eq!(page["logs"][0]["status"], "error");
    assert_eq!(page["logs"][0]["errors"][0]["code"], "TransportAuth");
}

#[test]
fn unknown_log_and_bad_pagination_fail() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .args(["log", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll log not found: 42"));
    nphies(&dir)
        .args(["logs", "--page", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pagination"));
}

#[test]
fn logs_without_runs_says_so() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .arg("logs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No poll runs recorded."));
}

// ---------------------------------------------------------------------------
// nphies records
// ---------------------------------------------------------------------------

#[test]
fn records_add_with_counterparts_and_cancel() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    let added = json_stdout(nphies(&dir).args([
        "-j",
        "records",
        "add",
        "prior_authorizations",
        "--business-id",
        "PA-100",
        "--patient",
        "pat-1",
        "--provider",
        "prov-1",
        "--service-date",
        "2026-03-10",
    ]));
    assert_eq!(added["businessId"], "PA-100");
    assert_eq!(added["serviceDate"], "2026-03-10");
    assert_eq!(added["status"], "pending");
    assert_eq!(added["createdByPoll"], false);

    let cancelled = json_stdout(nphies(&dir).args([
        "-j",
        "records",
        "cancel",
        "prior_authorizations",
        "1",
    ]));
    assert_eq!(cancelled["status"], "cancelled");
}

#[test]
fn records_add_rejects_partial_counterparts() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .args(["records", "add", "claim_submissions", "--patient", "pat-1"])
        .assert()
        .failure();
}

#[test]
fn records_rejects_unknown_table() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .args(["records", "list", "invoices"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invoices"));
}

// ---------------------------------------------------------------------------
// nphies config / recover
// ---------------------------------------------------------------------------

#[test]
fn config_validate_reports_bad_endpoint() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    let path = dir.path().join(".nphies/config.yaml");
    let yaml = std::fs::read_to_string(&path)
        .unwrap()
        .replace("https://exchange.test/poll", "ftp://exchange.test/poll");
    std::fs::write(&path, yaml).unwrap();
    nphies(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] exchange.endpoint"));
}

#[test]
fn recover_with_nothing_in_progress() {
    let dir = TempDir::new().unwrap();
    init_with(&dir, "https://exchange.test/poll");
    nphies(&dir)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("No interrupted runs."));
}
