use std::collections::BTreeSet;

use super::types::{BuildTarget, Flavor, TargetParseError};

const BUILD_RULE_PREFIX: &str = "//";

impl BuildTarget {
  /// Parse a target string.
  ///
  /// Accepts `cell//base:name#f1,f2`, `//base:name` and `:name`; the last
  /// form resolves against `context_base` (a `//base` string).
  pub fn parse(text: &str, context_base: Option<&str>) -> Result<Self, TargetParseError> {
    if text.ends_with(':') {
      return Err(TargetParseError::TrailingColon(text.to_string()));
    }

    let (cell, rest) = match text.find(BUILD_RULE_PREFIX) {
      Some(idx) if idx > 0 => (Some(&text[..idx]), &text[idx..]),
      _ => (None, text),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 2 {
      return Err(TargetParseError::ColonCount {
        target: text.to_string(),
        found: parts.len() - 1,
      });
    }

    let base_name = if parts[0].is_empty() {
      context_base.ok_or_else(|| TargetParseError::RelativeWithoutBase(text.to_string()))?
    } else {
      parts[0]
    };

    let (short_name, flavors) = match parts[1].split_once('#') {
      Some((name, flavor_list)) => (name, parse_flavors(flavor_list)?),
      None => (parts[1], BTreeSet::new()),
    };

    let mut target = BuildTarget::new(cell, base_name, short_name)?;
    target.set_flavors(flavors);
    Ok(target)
  }
}

fn parse_flavors(list: &str) -> Result<BTreeSet<Flavor>, TargetParseError> {
  list
    .split(',')
    .filter(|f| !f.is_empty())
    .map(Flavor::new)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_fully_qualified_target() {
    let target = BuildTarget::parse("//java/com/example:lib", None).unwrap();
    assert_eq!(target.cell(), None);
    assert_eq!(target.base_name(), "//java/com/example");
    assert_eq!(target.short_name(), "lib");
    assert!(!target.is_flavored());
  }

  #[test]
  fn parses_cell_and_flavors() {
    let target = BuildTarget::parse("other//lib:core#shared,android-arm", None).unwrap();
    assert_eq!(target.cell(), Some("other"));
    assert_eq!(target.flavors().len(), 2);
    assert_eq!(
      target.fully_qualified_name(),
      "other//lib:core#android-arm,shared"
    );
  }

  #[test]
  fn relative_target_uses_context_base() {
    let target = BuildTarget::parse(":util", Some("//src/app")).unwrap();
    assert_eq!(target.to_string(), "//src/app:util");
    assert!(matches!(
      BuildTarget::parse(":util", None),
      Err(TargetParseError::RelativeWithoutBase(_))
    ));
  }

  #[test]
  fn trailing_colon_is_rejected() {
    let err = BuildTarget::parse("//foo:", None).unwrap_err();
    assert_eq!(err.to_string(), "//foo: cannot end with a colon");
  }

  #[test]
  fn colon_count_is_checked() {
    let err = BuildTarget::parse("//foo:bar:baz", None).unwrap_err();
    assert_eq!(err.to_string(), "//foo:bar:baz must contain exactly one colon (found 2)");
    let err = BuildTarget::parse("//foo", None).unwrap_err();
    assert_eq!(err.to_string(), "//foo must contain exactly one colon (found 0)");
  }

  #[test]
  fn base_must_start_with_slashes() {
    let err = BuildTarget::parse("foo:bar", None).unwrap_err();
    assert_eq!(err.to_string(), "Path in foo must start with //");
  }

  #[test]
  fn dot_segments_are_rejected() {
    let err = BuildTarget::parse("//foo/../bar:baz", None).unwrap_err();
    assert_eq!(
      err.to_string(),
      "Build target path cannot be absolute or contain . or .. (found //foo/../bar)"
    );
  }

  #[test]
  fn bad_flavor_is_reported() {
    let err = BuildTarget::parse("//:lib#d!x", None).unwrap_err();
    assert_eq!(err, TargetParseError::InvalidFlavor("d!x".to_string()));
  }

  #[test]
  fn backslashes_are_normalized() {
    let target = BuildTarget::parse("//foo\\bar:baz", None).unwrap();
    assert_eq!(target.base_name(), "//foo/bar");
  }
}
