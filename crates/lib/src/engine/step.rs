//! Running a rule's steps.
//!
//! Commands run through the platform shell with a small, fixed environment:
//! - `OUT`: the rule's output directory
//! - `SRCS`: absolute source paths, space separated
//! - `TMPDIR`/`TMP`/`TEMP`: per-rule scratch directory
//! - `TOOL`: the resolved tool path, when the rule has one
//! - `PATH` is inherited; everything else is cleared
//!
//! Commands run with the project root as their working directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::types::StepError;
use crate::consts::STDERR_TAIL_LINES;
use crate::rule::Step;

/// Everything a step may touch.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub project_root: PathBuf,
  pub out_dir: PathBuf,
  pub scratch_dir: PathBuf,
  pub srcs: Vec<PathBuf>,
  pub tool: Option<PathBuf>,
}

pub async fn execute_step(step: &Step, ctx: &StepContext) -> Result<(), StepError> {
  match step {
    Step::Cmd { cmd, env } => execute_cmd(cmd, env, ctx).await,
    Step::WriteFile { path, contents } => {
      let dest = inside(&ctx.out_dir, path)?;
      ensure_parent(&dest).await?;
      tokio::fs::write(&dest, contents)
        .await
        .map_err(|e| StepError::io(&dest, &e))
    }
    Step::Copy { from, to } => {
      let src = inside(&ctx.project_root, from)?;
      let dest = inside(&ctx.out_dir, to)?;
      ensure_parent(&dest).await?;
      tokio::fs::copy(&src, &dest)
        .await
        .map(|_| ())
        .map_err(|e| StepError::io(&src, &e))
    }
    Step::Mkdir { path } => {
      let dest = inside(&ctx.out_dir, path)?;
      tokio::fs::create_dir_all(&dest)
        .await
        .map_err(|e| StepError::io(&dest, &e))
    }
  }
}

async fn execute_cmd(cmd: &str, env: &BTreeMap<String, String>, ctx: &StepContext) -> Result<(), StepError> {
  info!(cmd = %cmd, "executing command");

  let (shell, shell_args) = shell();
  let srcs = ctx
    .srcs
    .iter()
    .map(|p| p.to_string_lossy())
    .collect::<Vec<_>>()
    .join(" ");

  let mut command = Command::new(shell);
  command
    .args(shell_args)
    .arg(cmd)
    .current_dir(&ctx.project_root)
    .env_clear()
    .env("OUT", &ctx.out_dir)
    .env("SRCS", srcs)
    .env("TMPDIR", &ctx.scratch_dir)
    .env("TMP", &ctx.scratch_dir)
    .env("TEMP", &ctx.scratch_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // 1980-01-01, the zip epoch.
    .env("SOURCE_DATE_EPOCH", "315532800")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  if let Some(path) = std::env::var_os("PATH") {
    command.env("PATH", path);
  }
  if let Some(tool) = &ctx.tool {
    command.env("TOOL", tool);
  }
  for (key, value) in env {
    command.env(key, value);
  }

  debug!(shell = %shell, cwd = %ctx.project_root.display(), "spawning process");
  let output = command.output().await.map_err(|e| StepError::Spawn {
    cmd: cmd.to_string(),
    message: e.to_string(),
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout);
  if !stdout.trim().is_empty() {
    debug!(stdout = %stdout.trim(), "command output");
  }

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(stderr = %stderr, "command stderr");
    return Err(StepError::CommandFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
    });
  }
  Ok(())
}

#[cfg(unix)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("/bin/sh", &["-c"])
}

#[cfg(windows)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("cmd.exe", &["/C"])
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.lines().collect();
  all[all.len().saturating_sub(lines)..].join("\n")
}

/// `base/rel`, refusing absolute paths and `..` components.
fn inside(base: &Path, rel: &str) -> Result<PathBuf, StepError> {
  let path = Path::new(rel);
  let escapes = path
    .components()
    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
  if escapes || rel.is_empty() {
    return Err(StepError::EscapesOutput { path: rel.to_string() });
  }
  Ok(base.join(path))
}

async fn ensure_parent(path: &Path) -> Result<(), StepError> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| StepError::io(parent, &e))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn ctx(temp: &TempDir) -> StepContext {
    let out_dir = temp.path().join("out");
    let scratch_dir = temp.path().join("tmp");
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::create_dir_all(&scratch_dir).unwrap();
    StepContext {
      project_root: temp.path().to_path_buf(),
      out_dir,
      scratch_dir,
      srcs: vec![temp.path().join("a.c")],
      tool: None,
    }
  }

  #[tokio::test]
  async fn write_file_and_mkdir_land_in_out() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    execute_step(&Step::write_file("sub/x.txt", "hi"), &ctx).await.unwrap();
    execute_step(&Step::Mkdir { path: "empty".to_string() }, &ctx)
      .await
      .unwrap();
    assert_eq!(std::fs::read_to_string(ctx.out_dir.join("sub/x.txt")).unwrap(), "hi");
    assert!(ctx.out_dir.join("empty").is_dir());
  }

  #[tokio::test]
  async fn copy_reads_from_project_root() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    std::fs::write(temp.path().join("a.c"), "int a;").unwrap();
    let step = Step::Copy {
      from: "a.c".to_string(),
      to: "copied.c".to_string(),
    };
    execute_step(&step, &ctx).await.unwrap();
    assert_eq!(std::fs::read_to_string(ctx.out_dir.join("copied.c")).unwrap(), "int a;");
  }

  #[tokio::test]
  async fn escaping_paths_are_rejected() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    for path in ["../evil", "/etc/passwd", ""] {
      let err = execute_step(&Step::write_file(path, "x"), &ctx).await.unwrap_err();
      assert!(matches!(err, StepError::EscapesOutput { .. }), "{path}: {err}");
    }
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn command_sees_out_and_srcs() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    execute_step(&Step::cmd("echo \"$SRCS\" > \"$OUT/srcs.txt\""), &ctx)
      .await
      .unwrap();
    let written = std::fs::read_to_string(ctx.out_dir.join("srcs.txt")).unwrap();
    assert_eq!(written.trim(), temp.path().join("a.c").to_string_lossy());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn command_env_overrides_apply() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    let step = Step::Cmd {
      cmd: "echo \"$GREETING\" > \"$OUT/greeting\"".to_string(),
      env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
    };
    execute_step(&step, &ctx).await.unwrap();
    assert_eq!(
      std::fs::read_to_string(ctx.out_dir.join("greeting")).unwrap().trim(),
      "hello"
    );
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failing_command_keeps_stderr_tail() {
    let temp = TempDir::new().unwrap();
    let ctx = ctx(&temp);
    let cmd = "i=0; while [ $i -lt 30 ]; do echo line$i >&2; i=$((i+1)); done; exit 3";
    match execute_step(&Step::cmd(cmd), &ctx).await {
      Err(StepError::CommandFailed { code, stderr_tail, .. }) => {
        assert_eq!(code, Some(3));
        let lines: Vec<_> = stderr_tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(lines.first(), Some(&"line10"));
        assert_eq!(lines.last(), Some(&"line29"));
      }
      other => panic!("expected command failure, got {other:?}"),
    }
  }

  #[test]
  fn tail_keeps_last_lines() {
    assert_eq!(tail("a\nb\nc", 2), "b\nc");
    assert_eq!(tail("a", 5), "a");
  }
}
