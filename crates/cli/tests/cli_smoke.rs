//! CLI smoke tests for cachet.
//!
//! Each test builds a small project in a temp directory and drives the
//! binary against it with an isolated artifact cache.

use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const GRAPH: &str = r#"{
  "targets": [
    {
      "target": "//:lib",
      "rule_type": "genrule",
      "srcs": ["lib.txt"],
      "steps": [{ "type": "copy", "from": "lib.txt", "to": "lib.txt" }]
    },
    {
      "target": "//:app",
      "rule_type": "genrule",
      "deps": ["//:lib"],
      "steps": [{ "type": "write_file", "path": "app.txt", "contents": "app" }]
    }
  ]
}"#;

/// A project whose artifact cache lives inside the temp dir.
struct Project {
  temp: TempDir,
}

impl Project {
  fn new(graph: &str) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("project")).unwrap();
    let project = Self { temp };
    project.write("cachet-graph.json", graph);
    project.write("lib.txt", "library v1");
    project
  }

  fn root(&self) -> std::path::PathBuf {
    self.temp.path().join("project")
  }

  fn write(&self, rel: &str, contents: &str) {
    let path = self.root().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
  }

  fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("cachet");
    cmd
      .arg("--root")
      .arg(self.root())
      .env("CACHET_CACHE_DIR", self.temp.path().join("artifacts"))
      .env_remove("CACHET_THREADS")
      .env_remove("CACHET_CACHE_MODE")
      .env_remove("RUST_LOG");
    cmd
  }

  fn rule_key(&self, target: &str) -> String {
    let output = self.cmd().args(["rulekey", target]).output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout)
      .unwrap()
      .split_whitespace()
      .next()
      .unwrap()
      .to_string()
  }
}

fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap()
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("cachet")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("cachet")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("cachet"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "rulekey", "hash", "diff"] {
    cargo_bin_cmd!("cachet")
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// build
// =============================================================================

#[test]
fn build_then_rebuild_from_cache() {
  let project = Project::new(GRAPH);

  project
    .cmd()
    .args(["build", "//:app"])
    .assert()
    .success()
    .stdout(predicate::str::contains("//:app built"))
    .stdout(predicate::str::contains("//:lib built"));

  let out = project.root().join("cachet-out/gen");
  assert_eq!(read(&out.join("app/app.txt")), "app");
  assert_eq!(read(&out.join("lib/lib.txt")), "library v1");

  std::fs::remove_dir_all(project.root().join("cachet-out")).unwrap();
  project
    .cmd()
    .args(["build", "//:app"])
    .assert()
    .success()
    .stdout(predicate::str::contains("//:app cached from dir"));
  assert_eq!(read(&out.join("app/app.txt")), "app");
}

#[test]
fn build_json_reports_every_target() {
  let project = Project::new(GRAPH);

  let output = project.cmd().args(["build", "--json", "//:app"]).output().unwrap();
  assert!(output.status.success());
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["exit_code"], 0);
  let statuses: Vec<_> = report["targets"]
    .as_array()
    .unwrap()
    .iter()
    .map(|t| (t["target"].as_str().unwrap(), t["status"].as_str().unwrap()))
    .collect();
  assert_eq!(statuses, vec![("//:app", "built"), ("//:lib", "built")]);
}

#[test]
fn disabled_cache_always_builds() {
  let project = Project::new(GRAPH);
  for _ in 0..2 {
    project
      .cmd()
      .env("CACHET_CACHE_MODE", "disabled")
      .args(["build", "//:lib"])
      .assert()
      .success()
      .stdout(predicate::str::contains("//:lib built"));
  }
  assert!(!project.temp.path().join("artifacts").exists());
}

#[cfg(unix)]
#[test]
fn failing_step_exits_one_and_skips_dependents() {
  let project = Project::new(
    r#"{
  "targets": [
    { "target": "//:bad", "rule_type": "genrule", "steps": [{ "type": "cmd", "cmd": "echo broken >&2; exit 3" }] },
    { "target": "//:top", "rule_type": "genrule", "deps": ["//:bad"] }
  ]
}"#,
  );

  project
    .cmd()
    .args(["build", "//:top"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("//:bad failed"))
    .stderr(predicate::str::contains("exit code 3"))
    .stderr(predicate::str::contains("//:top skipped"));
}

#[test]
fn unknown_target_fails() {
  let project = Project::new(GRAPH);
  project
    .cmd()
    .args(["build", "//:nope"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("//:nope"));
}

#[test]
fn malformed_target_is_rejected() {
  let project = Project::new(GRAPH);
  project
    .cmd()
    .args(["build", "no-slashes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid target"));
}

#[test]
fn missing_graph_fails() {
  let temp = TempDir::new().unwrap();
  cargo_bin_cmd!("cachet")
    .arg("--root")
    .arg(temp.path())
    .args(["build", "//:app"])
    .env("CACHET_CACHE_DIR", temp.path().join("artifacts"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load target graph"));
}

// =============================================================================
// rulekey
// =============================================================================

#[test]
fn rule_key_is_stable_and_tracks_sources() {
  let project = Project::new(GRAPH);

  let first = project.rule_key("//:app");
  assert_eq!(first.len(), 64);
  assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
  assert_eq!(project.rule_key("//:app"), first);

  project.write("lib.txt", "library v2");
  assert_ne!(project.rule_key("//:app"), first);
}

#[test]
fn rulekey_json_output() {
  let project = Project::new(GRAPH);
  let output = project.cmd().args(["rulekey", "--json", "//:lib"]).output().unwrap();
  assert!(output.status.success());
  let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(entries[0]["target"], "//:lib");
  assert_eq!(entries[0]["key"].as_str().unwrap().len(), 64);
}

// =============================================================================
// hash
// =============================================================================

#[test]
fn hash_prints_content_hash() {
  let project = Project::new(GRAPH);
  project
    .cmd()
    .args(["hash", "lib.txt"])
    .assert()
    .success()
    .stdout(predicate::str::is_match("^[0-9a-f]{64}  lib.txt\n$").unwrap());
}

#[test]
fn hash_missing_path_fails() {
  let project = Project::new(GRAPH);
  project
    .cmd()
    .args(["hash", "missing.txt"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing.txt"));
}

// =============================================================================
// diff
// =============================================================================

#[test]
fn diff_explains_changed_source() {
  let project = Project::new(GRAPH);
  project.write(".cachet.toml", "[build]\nrule_key_log = \"keys.jsonl\"\n");

  project.cmd().args(["rulekey", "//:app"]).assert().success();
  std::fs::rename(project.root().join("keys.jsonl"), project.root().join("before.jsonl")).unwrap();

  project.write("lib.txt", "library v2");
  project.cmd().args(["rulekey", "//:app"]).assert().success();

  project
    .cmd()
    .args(["diff", "before.jsonl", "keys.jsonl", "//:app"])
    .current_dir(project.root())
    .assert()
    .success()
    .stdout(predicate::str::contains("Change details for [//:lib]"))
    .stdout(predicate::str::contains("(srcs):"));
}

#[test]
fn diff_of_unlogged_target_fails() {
  let project = Project::new(GRAPH);
  project.write(".cachet.toml", "[build]\nrule_key_log = \"keys.jsonl\"\n");
  project.cmd().args(["rulekey", "//:lib"]).assert().success();

  project
    .cmd()
    .args(["diff", "keys.jsonl", "keys.jsonl", "//:app"])
    .current_dir(project.root())
    .assert()
    .failure()
    .stderr(predicate::str::contains("does not contain //:app"));
}
