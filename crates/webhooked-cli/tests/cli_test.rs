use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const SIGNATURE: &str = "88cd2108b5347d973cf39cdf9053d7dd42704876d8c9a9bd8e2d168259d3ddf7";

/// Write a project whose only webhook checks an HMAC signature of the body
fn setup_project(dir: &tempfile::TempDir) {
    std::fs::write(dir.path().join("body.txt"), "test").unwrap();
    std::fs::write(
        dir.path().join("webhooks.yaml"),
        format!(
            r#"
apiVersion: v1alpha1
specs:
  - name: signed
    entrypointUrl: /webhooks/signed
    security:
      - header:
          id: signature
          inputs:
            - name: headerName
              value: X-Signature
      - generate_hmac_256:
          id: expected
          inputs:
            - name: secret
              value: test
            - name: payload
              value: "{{{{ Inputs.payload }}}}"
      - compare:
          inputs:
            - name: first
              value: "{{{{ Outputs.signature.value }}}}"
            - name: second
              value: "{{{{ Outputs.expected.value }}}}"
    storage:
      - type: file
        specs:
          path: {}
    response:
      formatting:
        templateString: "stored {{{{ PreviousPayload }}}}"
      httpCode: 202
"#,
            dir.path().join("data/events.jsonl").display()
        ),
    )
    .unwrap();
}

#[test]
fn test_validate() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(&dir);

    cargo_bin_cmd!("webhooked")
        .args(["--config", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 webhook specifications are valid"));
}

#[test]
fn test_validate_missing_config() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("webhooked")
        .args(["--config", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_validate_unknown_step() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("webhooks.yaml"),
        "specs:\n  - name: hook\n    entrypointUrl: /hook\n    security:\n      - telepathy: {}\n",
    )
    .unwrap();

    cargo_bin_cmd!("webhooked")
        .args(["--config", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a registered step"));
}

#[test]
fn test_specs_json() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(&dir);

    let output = cargo_bin_cmd!("webhooked")
        .args(["--config", dir.path().to_str().unwrap(), "specs", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let specs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(specs[0]["name"], "signed");
    assert_eq!(specs[0]["entrypointUrl"], "/webhooks/signed");
    assert_eq!(
        specs[0]["security"],
        serde_json::json!(["header", "generate_hmac_256", "compare"])
    );
    assert_eq!(specs[0]["storage"], serde_json::json!(["file"]));
    assert_eq!(specs[0]["httpCode"], 202);
}

#[test]
fn test_replay_stores_payload() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(&dir);
    let body = dir.path().join("body.txt");
    let signature = format!("X-Signature: {}", SIGNATURE);

    cargo_bin_cmd!("webhooked")
        .args([
            "--config",
            dir.path().to_str().unwrap(),
            "replay",
            "/webhooks/signed",
            "--body",
            body.to_str().unwrap(),
            "-H",
            signature.as_str(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("202 text/plain"))
        .stdout(predicate::str::contains("stored test"));

    let stored = std::fs::read_to_string(dir.path().join("data/events.jsonl")).unwrap();
    assert_eq!(stored.trim(), r#""test""#);
}

#[test]
fn test_replay_rejected() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(&dir);
    let body = dir.path().join("body.txt");

    cargo_bin_cmd!("webhooked")
        .args([
            "--config",
            dir.path().to_str().unwrap(),
            "replay",
            "/webhooks/signed",
            "--body",
            body.to_str().unwrap(),
            "-H",
            "X-Signature: forged",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("403"));

    assert!(!dir.path().join("data/events.jsonl").exists());
}
