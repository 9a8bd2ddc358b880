use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // No network: catalog and model are both disabled.
    let config_content = format!(
        r#"[db]
path = "{}/data/hl.sqlite"

[catalog]
provider = "disabled"

[llm]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("hl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hl(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = env!("CARGO_BIN_EXE_hl");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, code) = run_hl(&config_path, &["init"]);
    assert_eq!(code, Some(0), "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("hl.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, first) = run_hl(&config_path, &["init"]);
    assert_eq!(first, Some(0), "First init failed");

    let (_, _, second) = run_hl(&config_path, &["init"]);
    assert_eq!(second, Some(0), "Second init failed (not idempotent)");
}

#[test]
fn test_empty_history() {
    let (tmp, config_path) = setup_test_env("");
    run_hl(&config_path, &["init"]);

    let (stdout, _, code) = run_hl(&config_path, &["history", "list"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("No analyses recorded"));

    let (stdout, _, code) = run_hl(&config_path, &["history", "stats"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("Analyses:    0"));

    let out = tmp.path().join("export.json");
    let (_, stderr, code) = run_hl(
        &config_path,
        &["history", "export", "--output", out.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "export failed: {}", stderr);
    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(exported["count"], 0);

    let (_, stderr, code) = run_hl(&config_path, &["history", "show", "3017620422003"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("No history"));
}

#[test]
fn test_analyze_invalid_barcode_json_error() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, code) = run_hl(&config_path, &["analyze", "--barcode", "12-ab", "--json"]);
    assert_eq!(code, Some(2), "stdout={}, stderr={}", stdout, stderr);
    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["error"]["code"], "invalid_input");
    assert!(body["error"]["hint"].is_string());
}

#[test]
fn test_analyze_with_disabled_catalog() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, stderr, code) = run_hl(&config_path, &["analyze", "--barcode", "3017620422003"]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("source_unavailable"));
    assert!(stderr.contains("Hint:"));
}

#[test]
fn test_analyze_without_history_leaves_no_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, code) = run_hl(
        &config_path,
        &["analyze", "--barcode", "3017620422003", "--no-history", "--json"],
    );
    assert_eq!(code, Some(2), "stdout={}, stderr={}", stdout, stderr);
    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["error"]["code"], "source_unavailable");
    assert!(!tmp.path().join("data").join("hl.sqlite").exists());
}

#[test]
fn test_analyze_requires_one_input() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, code) = run_hl(
        &config_path,
        &["analyze", "--barcode", "3017620422003", "--search", "nutella"],
    );
    assert_ne!(code, Some(0));

    let (_, _, code) = run_hl(&config_path, &["analyze"]);
    assert_ne!(code, Some(0));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env("\n[scoring]\nrule_weight = 0.5\nmodel_weight = 0.6\n");

    let (_, stderr, code) = run_hl(&config_path, &["init"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("weight"), "stderr={}", stderr);
}
