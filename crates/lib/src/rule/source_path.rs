use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hasher::ArchiveMemberPath;
use crate::target::{BuildTarget, TargetParseError};

/// A rule input.
///
/// Serialized as a plain string: `src/a.c`, `/abs/tool`, `lib.zip!/a.txt`,
/// or a build target such as `//gen:headers`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourcePath {
  /// Relative to the project root.
  Relative(PathBuf),
  Absolute(PathBuf),
  ArchiveMember(ArchiveMemberPath),
  /// The output of another rule.
  BuildTargetOutput(BuildTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourcePathError {
  #[error("source path must not be empty")]
  Empty,

  #[error("invalid build target source: {0}")]
  Target(#[from] TargetParseError),

  #[error("invalid archive member path {0}")]
  ArchiveMember(String),
}

impl SourcePath {
  pub fn relative(path: impl Into<PathBuf>) -> Self {
    SourcePath::Relative(path.into())
  }

  pub fn parse(text: &str) -> Result<Self, SourcePathError> {
    if text.is_empty() {
      return Err(SourcePathError::Empty);
    }
    if looks_like_target(text) {
      return Ok(SourcePath::BuildTargetOutput(BuildTarget::parse(text, None)?));
    }
    if text.contains(crate::consts::ARCHIVE_MEMBER_SEPARATOR) {
      return ArchiveMemberPath::parse(text)
        .map(SourcePath::ArchiveMember)
        .ok_or_else(|| SourcePathError::ArchiveMember(text.to_string()));
    }
    let path = PathBuf::from(text);
    if path.is_absolute() {
      Ok(SourcePath::Absolute(path))
    } else {
      Ok(SourcePath::Relative(path))
    }
  }

  /// The target whose output this path names, if any.
  pub fn build_target(&self) -> Option<&BuildTarget> {
    match self {
      SourcePath::BuildTargetOutput(target) => Some(target),
      _ => None,
    }
  }
}

/// `//x:y` or `cell//x:y`; a cell name never contains `/`.
fn looks_like_target(text: &str) -> bool {
  match text.find("//") {
    Some(0) => true,
    Some(idx) => !text[..idx].contains(['/', '\\']) && text.contains(':'),
    None => false,
  }
}

impl fmt::Display for SourcePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourcePath::Relative(path) => f.write_str(&path.to_string_lossy().replace('\\', "/")),
      SourcePath::Absolute(path) => write!(f, "{}", path.display()),
      SourcePath::ArchiveMember(member) => write!(f, "{member}"),
      SourcePath::BuildTargetOutput(target) => write!(f, "{target}"),
    }
  }
}

impl FromStr for SourcePath {
  type Err = SourcePathError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SourcePath::parse(s)
  }
}

impl TryFrom<String> for SourcePath {
  type Error = SourcePathError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    SourcePath::parse(&value)
  }
}

impl From<SourcePath> for String {
  fn from(path: SourcePath) -> Self {
    path.to_string()
  }
}
