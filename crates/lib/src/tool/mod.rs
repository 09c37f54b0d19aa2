//! Tool references and their resolution to concrete executables.
//!
//! A target names a tool (`cc`, optionally pinned to a platform). The
//! [`ToolProvider`] turns that into a [`ResolvedTool`] whose identity is part
//! of the rule key.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fs::ProjectFilesystem;
use crate::platform::platform_triple;
use crate::rule::SourcePath;
use crate::rulekey::{AppendsToRuleKey, RuleKeyBuilder, RuleKeyError};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolRef {
  pub name: String,
  /// Platform triple; defaults to the host.
  #[serde(default)]
  pub platform: Option<String>,
}

impl ToolRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      platform: None,
    }
  }
}

impl fmt::Display for ToolRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.platform {
      Some(platform) => write!(f, "{}@{}", self.name, platform),
      None => f.write_str(&self.name),
    }
  }
}

/// A concrete tool.
///
/// A tool inside the project (relative `path`) contributes its contents to
/// rule keys; a system tool contributes only its file name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTool {
  pub name: String,
  pub path: PathBuf,
  pub version: String,
}

impl ResolvedTool {
  pub fn is_project_relative(&self) -> bool {
    !self.path.is_absolute()
  }
}

impl AppendsToRuleKey for ResolvedTool {
  fn append_to_rule_key(&self, builder: &mut RuleKeyBuilder<'_>) -> Result<(), RuleKeyError> {
    builder.set("name", &self.name)?.set("version", &self.version)?;
    if self.path.is_absolute() {
      let file_name = self
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
      builder.set("path", file_name)?;
    } else {
      builder.set("path", SourcePath::Relative(self.path.clone()))?;
    }
    Ok(())
  }
}

/// `[tools.<name>]` configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
  pub path: PathBuf,
  #[serde(default)]
  pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolResolutionError {
  #[error("no tool configured for {0}")]
  NotConfigured(ToolRef),

  #[error("tool {tool} not found at {path}")]
  Missing { tool: ToolRef, path: PathBuf },
}

pub trait ToolProvider: Send + Sync {
  fn resolve(&self, tool: &ToolRef) -> Result<ResolvedTool, ToolResolutionError>;
}

/// Resolves tools from configuration.
///
/// `name@<triple>` entries take precedence over a bare `name`. Project-relative
/// tool paths must exist; absolute paths are trusted.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredToolProvider {
  tools: BTreeMap<String, ToolConfig>,
  fs: Option<Arc<dyn ProjectFilesystem>>,
}

impl ConfiguredToolProvider {
  pub fn new(tools: BTreeMap<String, ToolConfig>) -> Self {
    Self { tools, fs: None }
  }

  /// Check project-relative tool paths against `fs`.
  pub fn with_filesystem(mut self, fs: Arc<dyn ProjectFilesystem>) -> Self {
    self.fs = Some(fs);
    self
  }

  fn lookup(&self, tool: &ToolRef) -> Option<&ToolConfig> {
    let platform = tool.platform.clone().or_else(platform_triple);
    platform
      .and_then(|p| self.tools.get(&format!("{}@{}", tool.name, p)))
      .or_else(|| self.tools.get(&tool.name))
  }
}

impl ToolProvider for ConfiguredToolProvider {
  fn resolve(&self, tool: &ToolRef) -> Result<ResolvedTool, ToolResolutionError> {
    let config = self
      .lookup(tool)
      .ok_or_else(|| ToolResolutionError::NotConfigured(tool.clone()))?;

    if let Some(fs) = &self.fs
      && !config.path.is_absolute()
      && !fs.exists(&config.path)
    {
      return Err(ToolResolutionError::Missing {
        tool: tool.clone(),
        path: fs.resolve(&config.path),
      });
    }

    debug!(tool = %tool, path = %config.path.display(), "resolved tool");
    Ok(ResolvedTool {
      name: tool.name.clone(),
      path: config.path.clone(),
      version: config.version.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::MemoryFilesystem;
  use crate::hasher::ContentHasher;

  fn config(path: &str, version: &str) -> ToolConfig {
    ToolConfig {
      path: PathBuf::from(path),
      version: version.to_string(),
    }
  }

  #[test]
  fn platform_specific_entry_wins() {
    let provider = ConfiguredToolProvider::new(BTreeMap::from([
      ("cc".to_string(), config("/usr/bin/cc", "1")),
      ("cc@test-os".to_string(), config("/opt/cross/cc", "2")),
    ]));
    let pinned = ToolRef {
      name: "cc".into(),
      platform: Some("test-os".into()),
    };
    assert_eq!(provider.resolve(&pinned).unwrap().version, "2");
    assert_eq!(provider.resolve(&ToolRef::new("cc")).unwrap().version, "1");
  }

  #[test]
  fn unknown_tool_is_not_configured() {
    let provider = ConfiguredToolProvider::default();
    assert_eq!(
      provider.resolve(&ToolRef::new("javac")),
      Err(ToolResolutionError::NotConfigured(ToolRef::new("javac")))
    );
  }

  #[test]
  fn missing_project_tool_is_reported() {
    let provider = ConfiguredToolProvider::new(BTreeMap::from([(
      "gen".to_string(),
      config("tools/gen.sh", ""),
    )]))
    .with_filesystem(Arc::new(MemoryFilesystem::default()));
    assert!(matches!(
      provider.resolve(&ToolRef::new("gen")),
      Err(ToolResolutionError::Missing { .. })
    ));
  }

  #[test]
  fn project_tool_contents_feed_the_key() {
    let tool = ResolvedTool {
      name: "gen".into(),
      path: PathBuf::from("tools/gen.sh"),
      version: String::new(),
    };
    let key_with = |script: &str| {
      let content = ContentHasher::new(Arc::new(
        MemoryFilesystem::default().with_file("tools/gen.sh", script),
      ));
      let mut builder = RuleKeyBuilder::new(&content);
      builder
        .set("tool", crate::rulekey::Value::appendable(tool.clone()))
        .unwrap();
      builder.build()
    };
    assert!(tool.is_project_relative());
    assert_ne!(key_with("echo 1"), key_with("echo 2"));
  }
}
