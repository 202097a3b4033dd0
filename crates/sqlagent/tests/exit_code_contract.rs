use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_REJECTED: i32 = 2;
const EXIT_CONFIG_FAILURE: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 64;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn fixture_measures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/measures")
}

/// Home, cwd and out dirs under one temp root; cwd carries a config.yaml
/// pointing at the fixture measures.
fn workspace(prefix: &str) -> (PathBuf, PathBuf, PathBuf) {
    let temp = unique_temp_dir(prefix);
    let home_dir = temp.join("home");
    let cwd = temp.join("cwd");
    let out_dir = temp.join("out");
    for dir in [&home_dir, &cwd, &out_dir] {
        std::fs::create_dir_all(dir).expect("workspace dir should be creatable");
    }
    std::fs::write(
        cwd.join("config.yaml"),
        format!("measures_dir: {}\n", fixture_measures_dir().display()),
    )
    .expect("config should be writable");
    (home_dir, cwd, out_dir)
}

fn sqlagent(home_dir: &Path, cwd: &Path, out_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sqlagent"))
        .current_dir(cwd)
        .env_remove("OPENAI_API_KEY")
        .env_remove("SQLAGENT_DB_PATH")
        .arg("--home-dir")
        .arg(home_dir)
        .arg("--cwd")
        .arg(cwd)
        .arg("--out-dir")
        .arg(out_dir)
        .args(args)
        .output()
        .expect("command should execute")
}

fn last_envelope(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("stdout should contain a JSON envelope");
    serde_json::from_str(line).expect("envelope should be JSON")
}

#[test]
fn missing_required_args_exits_with_usage_code() {
    let status = Command::new(env!("CARGO_BIN_EXE_sqlagent"))
        .arg("ask")
        .status()
        .expect("command should execute");

    assert_eq!(status.code(), Some(EXIT_USAGE_ERROR));
}

#[test]
fn resume_without_a_decision_is_a_usage_error() {
    let status = Command::new(env!("CARGO_BIN_EXE_sqlagent"))
        .args(["resume", "2f1e0c4e-8c1b-4d55-9a51-2f8d7c6b5a43"])
        .status()
        .expect("command should execute");

    assert_eq!(status.code(), Some(EXIT_USAGE_ERROR));
}

#[test]
fn help_exits_successfully() {
    let status = Command::new(env!("CARGO_BIN_EXE_sqlagent"))
        .arg("--help")
        .status()
        .expect("command should execute");

    assert_eq!(status.code(), Some(EXIT_SUCCESS));
}

#[test]
fn accepted_sql_exits_successfully() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-sql-ok");
    let output = sqlagent(
        &home_dir,
        &cwd,
        &out_dir,
        &["sql", "validate", "SELECT COUNT(*) FROM risk_measures;"],
    );

    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = last_envelope(&output);
    assert_eq!(envelope["ok"], true);
    assert_eq!(envelope["data"]["sql"], "SELECT COUNT(*) FROM risk_measures");
}

#[test]
fn unsafe_sql_exits_with_rejected_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-sql-rejected");
    let output = sqlagent(
        &home_dir,
        &cwd,
        &out_dir,
        &["sql", "validate", "DELETE FROM risk_measures"],
    );

    assert_eq!(output.status.code(), Some(EXIT_REJECTED));
    let envelope = last_envelope(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "sql_guardrail_violation");
    assert_eq!(envelope["error"]["details"]["rule"], "not_select");
}

#[test]
fn unknown_measure_assembly_exits_with_rejected_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-assemble-rejected");
    let output = sqlagent(
        &home_dir,
        &cwd,
        &out_dir,
        &["sql", "assemble", "--measure", "CE", "--measure", "unknown_measure"],
    );

    assert_eq!(output.status.code(), Some(EXIT_REJECTED));
    let envelope = last_envelope(&output);
    assert_eq!(envelope["error"]["code"], "measures_unresolved");
    assert_eq!(envelope["error"]["details"]["unmatched"][0], "unknown_measure");
}

#[test]
fn missing_config_file_exits_with_config_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-config-missing");
    let output = sqlagent(
        &home_dir,
        &cwd,
        &out_dir,
        &["--config", "absent.yaml", "measures", "list"],
    );

    assert_eq!(output.status.code(), Some(EXIT_CONFIG_FAILURE));
    assert_eq!(last_envelope(&output)["error"]["code"], "settings_invalid");
}

#[test]
fn broken_measure_directory_exits_with_config_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-measures-broken");
    let measures = cwd.join("measures");
    std::fs::create_dir_all(&measures).expect("measures dir should be creatable");
    std::fs::write(measures.join("bad.json"), "{ not json").expect("bad config should write");
    std::fs::write(cwd.join("config.yaml"), "measures_dir: measures\n")
        .expect("config should be writable");

    let output = sqlagent(&home_dir, &cwd, &out_dir, &["measures", "list"]);

    assert_eq!(output.status.code(), Some(EXIT_CONFIG_FAILURE));
    let envelope = last_envelope(&output);
    assert_eq!(envelope["error"]["code"], "measure_config_invalid");
    assert_eq!(envelope["error"]["details"]["kind"], "malformed_config");
}

#[test]
fn ask_without_api_key_exits_with_config_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-ask-no-key");
    let output = sqlagent(&home_dir, &cwd, &out_dir, &["ask", "Show me CE by obligor"]);

    assert_eq!(output.status.code(), Some(EXIT_CONFIG_FAILURE));
    assert_eq!(last_envelope(&output)["error"]["code"], "llm_api_key_missing");
}

#[test]
fn unknown_session_exits_with_runtime_code() {
    let (home_dir, cwd, out_dir) = workspace("sqlagent-exit-resume-missing");
    let output = sqlagent(
        &home_dir,
        &cwd,
        &out_dir,
        &["resume", "2f1e0c4e-8c1b-4d55-9a51-2f8d7c6b5a43", "--confirm"],
    );

    assert_eq!(output.status.code(), Some(EXIT_RUNTIME_FAILURE));
    assert_eq!(last_envelope(&output)["error"]["code"], "session_not_found");
}

#[test]
fn relative_home_dir_exits_with_runtime_code() {
    let (_, cwd, out_dir) = workspace("sqlagent-exit-relative-home");
    let output = sqlagent(Path::new("relative"), &cwd, &out_dir, &["measures", "list"]);

    assert_eq!(output.status.code(), Some(EXIT_RUNTIME_FAILURE));
}
