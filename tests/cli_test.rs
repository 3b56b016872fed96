//! CLI tests: exit codes and report shapes of the one-shot commands

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self::with_audit(false)
    }

    fn with_audit(enabled: bool) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let specs = dir.path().join("specs");
        fs::create_dir_all(&specs).unwrap();
        let config = format!(
            "discovery:\n  paths:\n    - {}\ncache:\n  dir: {}\naudit:\n  enabled: {}\n  path: {}\n",
            specs.display(),
            dir.path().join("cache").display(),
            enabled,
            dir.path().join("audit.jsonl").display()
        );
        fs::write(dir.path().join("promptd.yml"), config).unwrap();
        Self { dir }
    }

    fn spec(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("specs").join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("promptd").unwrap();
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_DATA_HOME", self.dir.path().join("data"))
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(self.dir.path().join("promptd.yml"));
        cmd
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

const GOOD: &str = r#"version: "1.0"
metadata:
  name: greet
  display_name: Greeting
  description: Greets someone
  category: demo
parameters:
  who:
    type: string
    default: world
    description: Who to greet
  times:
    type: int
    default: 1
    description: Repetitions
    constraints: { min: 1, max: 3 }
template:
  source: "Hello {{who}} x{{times}}"
examples:
  - parameters: { who: Ada }
"#;

#[test]
fn test_validate_ok_exits_zero() {
    let ws = Workspace::new();
    let path = ws.spec("greet.yml", GOOD);
    ws.cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_validate_schema_error_exits_two() {
    let ws = Workspace::new();
    let path = ws.spec("bad.yml", "version: \"1.0\"\nmetadata:\n  name: Bad Name\n");
    ws.cmd().arg("validate").arg(&path).assert().code(2);
}

#[test]
fn test_validate_security_violation_exits_four() {
    let ws = Workspace::new();
    let path = ws.spec("evil.yml", &GOOD.replace("Hello {{who}}", "Hello {{who}} {{exec 'ls'}}"));
    ws.cmd()
        .args(["--format", "json", "validate"])
        .arg(&path)
        .assert()
        .code(4)
        .stdout(predicate::str::contains("\"security_violation\""));
}

#[test]
fn test_validate_records_security_violation_in_journal() {
    let ws = Workspace::with_audit(true);
    let path = ws.spec("evil.yml", &GOOD.replace("Hello {{who}}", "Hello {{who}} {{exec 'ls'}}"));
    ws.cmd().arg("validate").arg(&path).assert().code(4);

    let journal = fs::read_to_string(ws.path().join("audit.jsonl")).unwrap();
    let events: Vec<serde_json::Value> = journal.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert!(events.iter().any(|e| e["event_type"] == "security_violation" && e["identifier"] == "greet"));
    assert!(events.iter().any(|e| e["event_type"] == "spec_rejected"));
}

#[test]
fn test_generate_records_artifact_in_journal() {
    let ws = Workspace::with_audit(true);
    let path = ws.spec("greet.yml", GOOD);
    ws.cmd().arg("generate").arg(&path).assert().success();

    let journal = fs::read_to_string(ws.path().join("audit.jsonl")).unwrap();
    assert!(journal.contains("\"spec_validated\""));
    assert!(journal.contains("\"artifact_generated\""));
}

#[test]
fn test_generate_writes_artifact() {
    let ws = Workspace::new();
    let path = ws.spec("greet.yml", GOOD);
    ws.cmd().arg("generate").arg(&path).assert().success();
    assert!(ws.path().join("cache").join("greet.json").exists());
}

#[test]
fn test_discover_json_report() {
    let ws = Workspace::new();
    ws.spec("greet.yml", GOOD);
    ws.spec("broken.yml", "metadata: [");
    let output = ws.cmd().args(["--format", "json", "discover"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "failed");
    assert_eq!(report["data"]["loaded"], serde_json::json!(["greet"]));
    assert_eq!(report["errors"].as_array().unwrap().len(), 1);
    assert!(report["timing_ms"].is_u64());
}

#[test]
fn test_render_with_params() {
    let ws = Workspace::new();
    ws.spec("greet.yml", GOOD);
    ws.cmd()
        .args(["render", "greet", "-p", "who=Ada", "-p", "times=2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello Ada x2"));
}

#[test]
fn test_render_constraint_violation_exits_two() {
    let ws = Workspace::new();
    ws.spec("greet.yml", GOOD);
    ws.cmd().args(["render", "greet", "-p", "times=9"]).assert().code(2);
}

#[test]
fn test_render_unknown_id_exits_one() {
    let ws = Workspace::new();
    ws.cmd().args(["render", "missing"]).assert().code(1);
}

#[test]
fn test_list_succeeds_with_broken_specs() {
    let ws = Workspace::new();
    ws.spec("greet.yml", GOOD);
    ws.spec("broken.yml", "metadata: [");
    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("greet [ok]"));
}
