use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::SourcePath;
use crate::rulekey::{AppendsToRuleKey, RuleKeyBuilder, RuleKeyError, Value};

/// One unit of work that produces part of a rule's output.
///
/// Paths in `WriteFile`, `Mkdir` and the destination of `Copy` are relative
/// to the rule's output directory; the source of `Copy` is relative to the
/// project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
  Cmd {
    cmd: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
  },
  WriteFile {
    path: String,
    contents: String,
  },
  Copy {
    from: String,
    to: String,
  },
  Mkdir {
    path: String,
  },
}

impl Step {
  pub fn kind(&self) -> &'static str {
    match self {
      Step::Cmd { .. } => "cmd",
      Step::WriteFile { .. } => "write_file",
      Step::Copy { .. } => "copy",
      Step::Mkdir { .. } => "mkdir",
    }
  }

  pub fn cmd(cmd: impl Into<String>) -> Self {
    Step::Cmd {
      cmd: cmd.into(),
      env: BTreeMap::new(),
    }
  }

  pub fn write_file(path: impl Into<String>, contents: impl Into<String>) -> Self {
    Step::WriteFile {
      path: path.into(),
      contents: contents.into(),
    }
  }
}

impl AppendsToRuleKey for Step {
  fn append_to_rule_key(&self, builder: &mut RuleKeyBuilder<'_>) -> Result<(), RuleKeyError> {
    builder.set("type", Value::Enum(self.kind().to_string()))?;
    match self {
      Step::Cmd { cmd, env } => {
        builder.set("cmd", cmd)?.set("env", env.clone())?;
      }
      Step::WriteFile { path, contents } => {
        builder.set("path", path)?.set("contents", contents)?;
      }
      Step::Copy { from, to } if !from.is_empty() => {
        // Read from the project root, so hashed like a source.
        builder.set("from", SourcePath::relative(from))?.set("to", to)?;
      }
      Step::Copy { from, to } => {
        builder.set("from", from)?.set("to", to)?;
      }
      Step::Mkdir { path } => {
        builder.set("path", path)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn steps_deserialize_from_tagged_json() {
    let steps: Vec<Step> = serde_json::from_str(
      r#"[
        {"type": "cmd", "cmd": "cc -c a.c"},
        {"type": "write_file", "path": "out.txt", "contents": "hi"},
        {"type": "copy", "from": "src/a.h", "to": "include/a.h"},
        {"type": "mkdir", "path": "lib"}
      ]"#,
    )
    .unwrap();
    assert_eq!(steps[0], Step::cmd("cc -c a.c"));
    assert_eq!(steps[1], Step::write_file("out.txt", "hi"));
    assert_eq!(steps[3].kind(), "mkdir");
  }
}
