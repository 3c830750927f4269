// cli_flow.rs — End-to-end tests driving the `warden` binary.
//
// Each test runs against a scratch project root so the caller's own
// `.warden/config.toml` (if any) never leaks in.

use std::fs;
use std::process::{Command, Output};

use tempfile::TempDir;

fn warden(project: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .arg("--project-root")
        .arg(project.path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn eval_prints_the_result_as_json() {
    let project = TempDir::new().unwrap();
    let out = warden(&project, &["eval", "-e", "let x = 20; x * 2 + 2"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "42");
}

#[test]
fn eval_accepts_endowments_and_files() {
    let project = TempDir::new().unwrap();
    let script = project.path().join("script.js");
    fs::write(&script, "({ total: base + items.length, who: name })").unwrap();
    let out = warden(
        &project,
        &[
            "eval",
            script.to_str().unwrap(),
            "--endow",
            "base=10",
            "--endow",
            "items=[1,2,3]",
            "--endow",
            "name=ada",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["total"], 13);
    assert_eq!(json["who"], "ada");
}

#[test]
fn eval_failure_exits_nonzero_with_a_sanitized_error() {
    let project = TempDir::new().unwrap();
    let out = warden(&project, &["eval", "--expr", "-e", "null.x"]);
    assert!(!out.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["error"]["kind"], "TypeError");
    assert_eq!(json["error"]["opaque"], false);
}

#[test]
fn project_config_selects_capabilities() {
    let project = TempDir::new().unwrap();
    let tamed = warden(&project, &["eval", "-e", "isNaN(Date.now())"]);
    assert_eq!(stdout(&tamed).trim(), "true");

    fs::create_dir_all(project.path().join(".warden")).unwrap();
    fs::write(
        project.path().join(".warden/config.toml"),
        "[capabilities]\nclock_mode = \"allow\"\n",
    )
    .unwrap();
    let allowed = warden(&project, &["eval", "-e", "Date.now() > 0"]);
    assert_eq!(stdout(&allowed).trim(), "true");
}

#[test]
fn policy_show_lists_shims_and_fingerprint() {
    let project = TempDir::new().unwrap();
    let out = warden(&project, &["policy", "show"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("Fingerprint:"));
    assert!(text.contains("clock, random, locale, diagnostic, pattern"));
    assert!(text.contains("%FunctionPrototype%"));
}

#[test]
fn audit_passes_for_the_default_policy() {
    let project = TempDir::new().unwrap();
    let out = warden(&project, &["audit", "--paths"]);
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    let text = stdout(&out);
    assert!(text.contains("Audit passed"));
    assert!(text.contains("Math.abs"));
    assert!(!text.contains("Intl"));
}
