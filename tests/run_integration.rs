//! End-to-end run tests against fake driver executables.
//!
//! Each test builds a throwaway run root with shell scripts standing in for
//! the real driver binaries under `bin/`, then drives the runner through the
//! library entry points and asserts on the final outcome document.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use viscell::config::Config;
use viscell::error::ErrorCode;
use viscell::input::{RunInput, StepConfig};
use viscell::report::RunOutcome;
use viscell::runner::{self, RunContext};

/// A scratch run root with a `bin/` directory for fake drivers.
struct CellRoot {
    dir: TempDir,
}

impl CellRoot {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Install a fake driver script under `bin/`.
    fn install_driver(&self, name: &str, body: &str) {
        let path = self.dir.path().join("bin").join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
}

fn config_from(value: serde_json::Value) -> Config {
    serde_json::from_value(value).unwrap()
}

fn single_keyence_config() -> Config {
    config_from(json!({
        "devices": {
            "cam1": {"type": "keyence-cv-x", "host": "127.0.0.1"}
        }
    }))
}

fn step(device: Option<&str>, program: Option<&str>) -> StepConfig {
    serde_json::from_value(json!({
        "device": device,
        "program": program,
    }))
    .unwrap()
}

fn input(steps: Vec<StepConfig>) -> RunInput {
    RunInput { steps }
}

async fn run(root: &CellRoot, config: Config, steps: Vec<StepConfig>) -> RunOutcome {
    let ctx = RunContext::new(root.path().to_path_buf(), config);
    runner::run(ctx, input(steps)).await
}

fn expect_failure(outcome: &RunOutcome) -> &ErrorCode {
    match outcome {
        RunOutcome::Failure(err) => &err.code,
        RunOutcome::Success { .. } => panic!("expected a failure outcome"),
    }
}

#[tokio::test]
async fn single_sync_step_settles_with_driver_report() {
    let root = CellRoot::new();
    root.install_driver(
        "keyence-cv-x-test",
        r#"echo '{"result": true, "score": 99}'"#,
    );

    let outcome = run(&root, single_keyence_config(), vec![step(None, None)]).await;

    let doc = outcome.to_document();
    assert_eq!(doc["result"], json!("success"));
    assert_eq!(doc["judgement"], json!(true));
    assert_eq!(doc["steps"].as_array().map(Vec::len), Some(1));
    assert_eq!(doc["steps"][0]["score"], json!(99));
    // No ingress configured and no reported path: the image is null.
    assert_eq!(doc["steps"][0]["image"], json!(null));
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn judgement_is_false_when_any_step_fails_inspection() {
    let root = CellRoot::new();
    // The fake driver passes or fails the part depending on the program.
    root.install_driver(
        "keyence-cv-x-test",
        r#"
if [ "$6" = "good" ]; then
  echo '{"result": true}'
else
  echo '{"result": false}'
fi"#,
    );

    let outcome = run(
        &root,
        single_keyence_config(),
        vec![step(None, Some("good")), step(None, Some("bad"))],
    )
    .await;

    let doc = outcome.to_document();
    assert_eq!(doc["result"], json!("success"));
    assert_eq!(doc["judgement"], json!(false));
    assert_eq!(doc["steps"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn first_failure_aborts_remaining_steps() {
    let root = CellRoot::new();
    let marker = root.path().join("second-step-ran");
    root.install_driver(
        "keyence-cv-x-test",
        &format!(
            r#"
if [ "$6" = "boom" ]; then
  echo ERR_CUSTOM_CODE >&2
  exit 3
fi
touch {}
echo '{{"result": true}}'"#,
            marker.display()
        ),
    );

    let outcome = run(
        &root,
        single_keyence_config(),
        vec![step(None, Some("boom")), step(None, Some("fine"))],
    )
    .await;

    assert_eq!(
        expect_failure(&outcome),
        &ErrorCode::Driver("ERR_CUSTOM_CODE".to_string())
    );
    assert_eq!(
        outcome.to_document(),
        json!({"result": "failure", "error": "ERR_CUSTOM_CODE"})
    );
    assert!(!marker.exists(), "second step must not have been dispatched");
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn exit_code_without_token_is_generic_step_failure() {
    let root = CellRoot::new();
    root.install_driver("keyence-cv-x-test", "exit 5");

    let outcome = run(&root, single_keyence_config(), vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::StepExitCode);
}

#[tokio::test]
async fn malformed_driver_report_is_invalid_step_result() {
    let root = CellRoot::new();
    root.install_driver("keyence-cv-x-test", "echo not-json");

    let outcome = run(&root, single_keyence_config(), vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::InvalidStepResult);
}

#[tokio::test]
async fn unknown_device_fails_the_run() {
    let root = CellRoot::new();
    let outcome = run(
        &root,
        single_keyence_config(),
        vec![step(Some("cam9"), None)],
    )
    .await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::UnknownDevice);
}

#[tokio::test]
async fn step_without_device_needs_a_single_configured_device() {
    let root = CellRoot::new();
    let config = config_from(json!({
        "devices": {
            "cam1": {"type": "keyence-cv-x", "host": "a"},
            "cam2": {"type": "keyence-cv-x", "host": "b"}
        }
    }));

    let outcome = run(&root, config, vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::UnknownDevice);
}

#[tokio::test]
async fn unsupported_driver_type_fails_the_run() {
    let root = CellRoot::new();
    let config = config_from(json!({
        "devices": {
            "cam1": {"type": "frobnicator-9000", "host": "127.0.0.1"}
        }
    }));

    let outcome = run(&root, config, vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::UnsupportedDevice);
}

#[tokio::test]
async fn missing_driver_binary_is_spawn_error() {
    let root = CellRoot::new();
    let outcome = run(&root, single_keyence_config(), vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::Spawn);
}

fn cognex_config(udp_port: u16, wait_for_results: Option<u64>) -> Config {
    let mut device = json!({
        "type": "cognex-is2000",
        "host": "127.0.0.1",
        "udpHost": "127.0.0.1",
        "udpPort": udp_port,
    });
    if let Some(wait) = wait_for_results {
        device["waitForResults"] = json!(wait);
    }
    config_from(json!({"devices": {"cam1": device}}))
}

#[tokio::test]
async fn dual_channel_step_joins_telemetry_with_exit() {
    let root = CellRoot::new();
    // The driver lingers briefly; telemetry arrives while it is running.
    root.install_driver("cognex-test", "sleep 0.4");

    let port = 47217;
    let sender = tokio::spawn(async move {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..40 {
            let _ = socket
                .send_to(b"pass=1\tX=1\tY=2.5", ("127.0.0.1", port))
                .await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    });

    let outcome = run(&root, cognex_config(port, None), vec![step(None, None)]).await;
    sender.abort();

    let doc = outcome.to_document();
    assert_eq!(doc["result"], json!("success"));
    assert_eq!(doc["judgement"], json!(true));
    assert_eq!(doc["steps"][0]["X"], json!(1));
    assert_eq!(doc["steps"][0]["Y"], json!(2.5));
}

#[tokio::test]
async fn dual_channel_step_without_telemetry_times_out() {
    let root = CellRoot::new();
    let marker = root.path().join("second-step-ran");
    root.install_driver("cognex-test", "exit 0");
    root.install_driver(
        "keyence-cv-x-test",
        &format!("touch {}\necho '{{}}'", marker.display()),
    );

    let config = config_from(json!({
        "devices": {
            "cam1": {
                "type": "cognex-is2000",
                "host": "127.0.0.1",
                "udpHost": "127.0.0.1",
                "udpPort": 47218,
                "waitForResults": 200,
            },
            "cam2": {"type": "keyence-cv-x", "host": "127.0.0.1"}
        }
    }));

    let outcome = run(
        &root,
        config,
        vec![step(Some("cam1"), None), step(Some("cam2"), None)],
    )
    .await;

    assert_eq!(expect_failure(&outcome), &ErrorCode::InvalidStepResult);
    assert!(!marker.exists(), "steps after the failure must not run");
}

#[tokio::test]
async fn dual_channel_nonzero_exit_reports_stderr_token() {
    let root = CellRoot::new();
    root.install_driver("cognex-test", "echo ERR_LOGIN_FAILED >&2\nexit 2");

    let outcome = run(&root, cognex_config(47219, Some(200)), vec![step(None, None)]).await;
    assert_eq!(
        expect_failure(&outcome),
        &ErrorCode::Driver("ERR_LOGIN_FAILED".to_string())
    );
}

#[tokio::test]
async fn dual_channel_device_without_udp_port_cannot_bind() {
    let root = CellRoot::new();
    let config = config_from(json!({
        "devices": {
            "cam1": {"type": "cognex-is2000", "host": "127.0.0.1"}
        }
    }));

    let outcome = run(&root, config, vec![step(None, None)]).await;
    assert_eq!(expect_failure(&outcome), &ErrorCode::UdpBind);
}
