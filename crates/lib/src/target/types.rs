use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or constructing a [`BuildTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetParseError {
  #[error("{0} cannot end with a colon")]
  TrailingColon(String),

  #[error("Cell name must not be empty.")]
  EmptyCell,

  #[error("{target} must contain exactly one colon (found {found})")]
  ColonCount { target: String, found: usize },

  #[error("Path in {0} must start with //")]
  MissingPrefix(String),

  #[error("Build target path cannot be absolute or contain . or .. (found {0})")]
  InvalidBasePath(String),

  #[error("Build target name cannot be empty (found {0})")]
  EmptyShortName(String),

  #[error("Build target name cannot contain '#' (found {0})")]
  HashInShortName(String),

  #[error("relative target {0} has no base path to resolve against")]
  RelativeWithoutBase(String),

  #[error("Invalid characters in flavor name: {0}")]
  InvalidFlavor(String),
}

/// A variant selector on a target (`#shared`, `#android-arm`).
///
/// Names are limited to `[-a-zA-Z0-9_.]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Flavor(String);

impl Flavor {
  pub fn new(name: impl Into<String>) -> Result<Self, TargetParseError> {
    let name = name.into();
    let valid = !name.is_empty()
      && name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
      return Err(TargetParseError::InvalidFlavor(name));
    }
    Ok(Flavor(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl TryFrom<String> for Flavor {
  type Error = TargetParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Flavor::new(value)
  }
}

impl From<Flavor> for String {
  fn from(flavor: Flavor) -> Self {
    flavor.0
  }
}

impl fmt::Display for Flavor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A fully qualified build target.
///
/// Two targets are equal iff cell, base name, short name and flavor set all
/// match. Flavors are held sorted, so `//:lib#foo,bar` and `//:lib#bar,foo`
/// name the same target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildTarget {
  cell: Option<String>,
  base_name: String,
  short_name: String,
  flavors: BTreeSet<Flavor>,
}

impl BuildTarget {
  /// Construct from parts, validating the base name and short name.
  pub fn new(
    cell: Option<&str>,
    base_name: &str,
    short_name: &str,
  ) -> Result<Self, TargetParseError> {
    if let Some(cell) = cell
      && cell.is_empty()
    {
      return Err(TargetParseError::EmptyCell);
    }
    let base_name = base_name.replace('\\', "/");
    check_base_name(&base_name)?;
    if short_name.is_empty() {
      return Err(TargetParseError::EmptyShortName(format!("{base_name}:")));
    }
    if short_name.contains('#') {
      return Err(TargetParseError::HashInShortName(short_name.to_string()));
    }
    Ok(BuildTarget {
      cell: cell.map(str::to_string),
      base_name,
      short_name: short_name.to_string(),
      flavors: BTreeSet::new(),
    })
  }

  /// A copy of this target carrying `flavors` in addition to its own.
  pub fn with_flavors(&self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
    let mut target = self.clone();
    target.flavors.extend(flavors);
    target
  }

  /// The same target with every flavor removed.
  pub fn unflavored(&self) -> Self {
    BuildTarget {
      flavors: BTreeSet::new(),
      ..self.clone()
    }
  }

  pub fn cell(&self) -> Option<&str> {
    self.cell.as_deref()
  }

  /// The `//foo/bar` part.
  pub fn base_name(&self) -> &str {
    &self.base_name
  }

  pub fn short_name(&self) -> &str {
    &self.short_name
  }

  pub fn flavors(&self) -> &BTreeSet<Flavor> {
    &self.flavors
  }

  pub fn is_flavored(&self) -> bool {
    !self.flavors.is_empty()
  }

  /// The base name as a path relative to the cell root.
  pub fn base_path(&self) -> PathBuf {
    let rel = self.base_name.trim_start_matches("//");
    if rel.is_empty() {
      PathBuf::new()
    } else {
      rel.split('/').collect()
    }
  }

  /// `name` or `name#flavor1,flavor2`, usable as a file name.
  pub fn short_name_and_flavor_postfix(&self) -> String {
    if self.flavors.is_empty() {
      self.short_name.clone()
    } else {
      format!("{}#{}", self.short_name, self.flavor_postfix())
    }
  }

  /// `cell//base:name#flavors`, with flavors in sorted order.
  pub fn fully_qualified_name(&self) -> String {
    format!(
      "{}{}:{}",
      self.cell.as_deref().unwrap_or(""),
      self.base_name,
      self.short_name_and_flavor_postfix()
    )
  }

  fn flavor_postfix(&self) -> String {
    self
      .flavors
      .iter()
      .map(Flavor::as_str)
      .collect::<Vec<_>>()
      .join(",")
  }

  pub(super) fn set_flavors(&mut self, flavors: BTreeSet<Flavor>) {
    self.flavors = flavors;
  }
}

impl fmt::Display for BuildTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.fully_qualified_name())
  }
}

impl TryFrom<String> for BuildTarget {
  type Error = TargetParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    BuildTarget::parse(&value, None)
  }
}

impl From<BuildTarget> for String {
  fn from(target: BuildTarget) -> Self {
    target.fully_qualified_name()
  }
}

impl std::str::FromStr for BuildTarget {
  type Err = TargetParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BuildTarget::parse(s, None)
  }
}

/// `//` alone is the cell root; otherwise every `/`-separated part must be a
/// real directory name.
fn check_base_name(base_name: &str) -> Result<(), TargetParseError> {
  let Some(rest) = base_name.strip_prefix("//") else {
    return Err(TargetParseError::MissingPrefix(base_name.to_string()));
  };
  if rest.is_empty() {
    return Ok(());
  }
  if rest.split('/').any(|part| matches!(part, "" | "." | "..")) {
    return Err(TargetParseError::InvalidBasePath(base_name.to_string()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn flavor(name: &str) -> Flavor {
    Flavor::new(name).unwrap()
  }

  #[test]
  fn flavors_render_sorted() {
    let target = BuildTarget::new(None, "//", "lib")
      .unwrap()
      .with_flavors([flavor("foo"), flavor("bar")]);
    assert_eq!(target.fully_qualified_name(), "//:lib#bar,foo");
  }

  #[test]
  fn flavor_order_does_not_affect_equality() {
    let base = BuildTarget::new(None, "//java", "lib").unwrap();
    let a = base.with_flavors([flavor("x"), flavor("y")]);
    let b = base.with_flavors([flavor("y"), flavor("x")]);
    assert_eq!(a, b);
    assert_ne!(a, base);
    assert_eq!(a.unflavored(), base);
  }

  #[test]
  fn invalid_flavor_is_rejected() {
    let err = Flavor::new("d!x").unwrap_err();
    assert_eq!(err.to_string(), "Invalid characters in flavor name: d!x");
    assert!(Flavor::new("android-arm_64.v2").is_ok());
  }

  #[test]
  fn base_path_is_relative() {
    let target = BuildTarget::new(None, "//foo/bar", "baz").unwrap();
    assert_eq!(target.base_path(), PathBuf::from("foo").join("bar"));
    let root = BuildTarget::new(None, "//", "baz").unwrap();
    assert_eq!(root.base_path(), PathBuf::new());
  }

  #[test]
  fn base_name_validation() {
    assert!(BuildTarget::new(None, "//..a/b../a...b", "x").is_ok());
    for bad in ["//.", "//../x", "///x", "//foo/", "//a/./b"] {
      assert!(
        matches!(
          BuildTarget::new(None, bad, "x"),
          Err(TargetParseError::InvalidBasePath(_))
        ),
        "{bad} should be rejected"
      );
    }
    assert!(matches!(
      BuildTarget::new(None, "foo", "x"),
      Err(TargetParseError::MissingPrefix(_))
    ));
  }

  #[test]
  fn serde_uses_fully_qualified_name() {
    let target: BuildTarget = serde_json::from_str("\"cell//a:b#f\"").unwrap();
    assert_eq!(target.cell(), Some("cell"));
    assert_eq!(serde_json::to_string(&target).unwrap(), "\"cell//a:b#f\"");
  }
}
