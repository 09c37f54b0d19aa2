//! Explains why a target's rule key differs between two logs.
//!
//! The walk starts at one target and moves breadth-first through rule-key
//! references whose records look like the same rule on both sides, so a
//! change deep in the graph is reported where it happened rather than at
//! every dependent.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use thiserror::Error;

use super::logger::{RuleKeyLog, RuleKeyRecord};
use super::types::RuleKey;
use crate::util::hash::hash_file;

const RULE_KEY_REF_START: &str = "ruleKey(sha256=";
const RULE_KEY_REF_END: &str = ")";
const MISSING: &str = "<missing>";
const NAME_ALIGNED_FIELDS: [&str; 3] = ["buck.declaredDeps", "buck.extraDeps", "deps"];

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
  /// Also report which referenced rules caused a change.
  pub verbose: bool,
  /// Inspect paths whose hashes changed on the local disk.
  pub check_paths: bool,
  /// Root that recorded paths are relative to when `check_paths` is on.
  pub project_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
  #[error("{side} log does not contain {target}. Did you forget to enable logging?")]
  TargetNotInLog { target: String, side: &'static str },
}

type KeyPair = (RuleKey, RuleKey);

/// Report lines describing every divergence reachable from `target`.
pub fn diff(
  target: &str,
  left: &RuleKeyLog,
  right: &RuleKeyLog,
  options: &DiffOptions,
) -> Result<Vec<String>, DiffError> {
  let left_key = left.key_for(target).ok_or_else(|| DiffError::TargetNotInLog {
    target: target.to_string(),
    side: "Left",
  })?;
  let right_key = right.key_for(target).ok_or_else(|| DiffError::TargetNotInLog {
    target: target.to_string(),
    side: "Right",
  })?;

  let mut queue = VecDeque::from([(target.to_string(), (left_key, right_key))]);
  let mut seen: HashSet<KeyPair> = HashSet::new();
  let mut result = Vec::new();

  while let Some((label, (lk, rk))) = queue.pop_front() {
    let (report, follow) = diff_records(&label, left.record(&lk), left, right.record(&rk), right, options);
    for (next_label, pair) in follow {
      if seen.insert(pair) {
        queue.push_back((next_label, pair));
      }
    }
    result.extend(report);
  }
  Ok(result)
}

fn diff_records(
  label: &str,
  left_record: Option<&RuleKeyRecord>,
  left: &RuleKeyLog,
  right_record: Option<&RuleKeyRecord>,
  right: &RuleKeyLog,
  options: &DiffOptions,
) -> (Vec<String>, BTreeSet<(String, KeyPair)>) {
  let left_fields = left_record.map(RuleKeyRecord::fields).unwrap_or_default();
  let right_fields = right_record.map(RuleKeyRecord::fields).unwrap_or_default();
  let fields: BTreeSet<&str> = left_fields.keys().chain(right_fields.keys()).copied().collect();

  let mut report = Vec::new();
  let mut changed_values: BTreeMap<&str, KeyValueDiff> = BTreeMap::new();
  let mut follow: BTreeSet<(String, KeyPair)> = BTreeSet::new();

  for field in fields {
    let mut left_refs = with_rule_key_refs(left_fields.get(field));
    let mut right_refs = with_rule_key_refs(right_fields.get(field));

    if NAME_ALIGNED_FIELDS.contains(&field) && align_by_name(&mut left_refs, left, &mut right_refs, right) {
      report.push(format!("  ({field}): order of deps was name-aligned."));
    }

    let len = left_refs.len().max(right_refs.len());
    for idx in 0..len {
      let (left_v, left_key) = left_refs.get(idx).copied().unwrap_or((MISSING, None));
      let (right_v, right_key) = right_refs.get(idx).copied().unwrap_or((MISSING, None));
      if left_v == right_v {
        continue;
      }

      let left_name = left_key.and_then(|k| left.name_of(&k));
      let right_name = right_key.and_then(|k| right.name_of(&k));

      if let (Some(lk), Some(rk)) = (left_key, right_key) {
        if let Some(name) = left_name
          && left_name == right_name
        {
          follow.insert((name.to_string(), (lk, rk)));
          continue;
        }
        if same_shape(left.record(&lk), right.record(&rk)) {
          follow.insert((format!("{label}->{field}"), (lk, rk)));
          continue;
        }
      }

      let left_v = match left_name {
        Some(name) => format!("\"{name}\"@{left_v}"),
        None => left_v.to_string(),
      };
      let right_v = match right_name {
        Some(name) => format!("\"{name}\"@{right_v}"),
        None => right_v.to_string(),
      };
      changed_values.entry(field).or_default().append(left_v, right_v);
    }
  }

  let mut interesting_paths = BTreeSet::new();
  for (field, values) in &changed_values {
    report.push(format!("  ({field}):"));
    report.extend(values.diff().into_iter().map(|line| format!("    {line}")));
    interesting_paths.extend(values.interesting_paths());
  }

  if options.verbose && !follow.is_empty() {
    let labels: BTreeSet<&str> = follow.iter().map(|(l, _)| l.as_str()).collect();
    report.push(format!(
      "  changed because of {}",
      labels.into_iter().collect::<Vec<_>>().join(",")
    ));
  }

  if options.check_paths && !interesting_paths.is_empty() {
    report.push("Information on paths the script has seen:".to_string());
    report.extend(describe_paths(&interesting_paths, options));
  }

  if !report.is_empty() {
    report.insert(0, format!("Change details for [{label}]"));
  }
  (report, follow)
}

fn with_rule_key_refs<'a>(values: Option<&Vec<&'a str>>) -> Vec<(&'a str, Option<RuleKey>)> {
  values
    .map(|values| values.iter().map(|v| (*v, rule_key_ref(v))).collect())
    .unwrap_or_default()
}

fn rule_key_ref(value: &str) -> Option<RuleKey> {
  value
    .strip_prefix(RULE_KEY_REF_START)?
    .strip_suffix(RULE_KEY_REF_END)?
    .parse()
    .ok()
}

/// Move right-hand entries so references to the same rule line up with the
/// left-hand side. Returns whether anything moved.
fn align_by_name(
  left_refs: &mut [(&str, Option<RuleKey>)],
  left: &RuleKeyLog,
  right_refs: &mut [(&str, Option<RuleKey>)],
  right: &RuleKeyLog,
) -> bool {
  let mut moved = false;
  for left_idx in 0..left_refs.len() {
    let Some(name) = left_refs[left_idx].1.and_then(|k| left.name_of(&k)) else {
      continue;
    };
    let found = right_refs
      .iter()
      .position(|(_, key)| key.and_then(|k| right.name_of(&k)) == Some(name));
    if let Some(right_idx) = found
      && right_idx != left_idx
      && left_idx < right_refs.len()
    {
      right_refs.swap(right_idx, left_idx);
      moved = true;
    }
  }
  moved
}

/// Records with identical field sets are assumed to describe the same thing.
fn same_shape(left: Option<&RuleKeyRecord>, right: Option<&RuleKeyRecord>) -> bool {
  match (left, right) {
    (Some(l), Some(r)) => {
      let lf: BTreeSet<&str> = l.entries.iter().map(|e| e.field.as_str()).collect();
      let rf: BTreeSet<&str> = r.entries.iter().map(|e| e.field.as_str()).collect();
      lf == rf
    }
    _ => false,
  }
}

fn describe_paths(paths: &BTreeSet<String>, options: &DiffOptions) -> Vec<String> {
  paths
    .iter()
    .map(|path| {
      let full = match &options.project_root {
        Some(root) => root.join(path),
        None => PathBuf::from(path),
      };
      if !full.exists() {
        format!(" {path} does not exist")
      } else if !full.is_file() {
        format!(" {path} is not a file")
      } else {
        match hash_file(&full) {
          Ok(hash) => format!(" {path} exists and hashes to {hash}"),
          Err(e) => format!(" {path} error hashing: {e}"),
        }
      }
    })
    .collect()
}

/// Pairs of differing values for one field.
#[derive(Debug, Default)]
struct KeyValueDiff {
  left: Vec<String>,
  right: Vec<String>,
}

impl KeyValueDiff {
  fn append(&mut self, left: String, right: String) {
    self.left.push(left);
    self.right.push(right);
  }

  /// `rel` out of every `path(rel:hash)` value that only one side has.
  fn interesting_paths(&self) -> Vec<String> {
    let (left_only, right_only) = self.one_sided();
    left_only.into_iter().chain(right_only).filter_map(path_of_value).collect()
  }

  fn one_sided(&self) -> (BTreeSet<&str>, BTreeSet<&str>) {
    let left: BTreeSet<&str> = self.left.iter().map(String::as_str).collect();
    let right: BTreeSet<&str> = self.right.iter().map(String::as_str).collect();
    let left_only = left.difference(&right).copied().collect();
    let right_only = right.difference(&left).copied().collect();
    (left_only, right_only)
  }

  fn diff(&self) -> Vec<String> {
    if self.left == self.right {
      return vec!["No changes".to_string()];
    }

    let mut left_sorted = self.left.clone();
    let mut right_sorted = self.right.clone();
    left_sorted.sort();
    right_sorted.sort();
    if left_sorted == right_sorted {
      return vec![format!(
        "Only order of entries differs: [{}] vs [{}].",
        self.left.join(", "),
        self.right.join(", ")
      )];
    }

    let left_lower: HashMap<String, &str> = self.left.iter().map(|v| (v.to_lowercase(), v.as_str())).collect();
    let right_lower: HashMap<String, &str> = self.right.iter().map(|v| (v.to_lowercase(), v.as_str())).collect();
    let left_keys: BTreeSet<&String> = left_lower.keys().collect();
    let right_keys: BTreeSet<&String> = right_lower.keys().collect();
    if left_keys == right_keys {
      let mut lines = vec!["Only order and letter casing (Upper Case vs lower case) of entries differs:".to_string()];
      for k in left_keys {
        let (l, r) = (left_lower[k], right_lower[k]);
        if l != r {
          lines.push(format!("-[{l}]"));
          lines.push(format!("+[{r}]"));
        }
      }
      return lines;
    }

    let (left_only, right_only) = self.one_sided();
    let left_common: Vec<&str> = self.left.iter().map(String::as_str).filter(|v| !left_only.contains(v)).collect();
    let right_common: Vec<&str> = self.right.iter().map(String::as_str).filter(|v| !right_only.contains(v)).collect();

    let mut left_out_of_order = Vec::new();
    let mut right_out_of_order = Vec::new();
    for idx in 0..left_common.len().max(right_common.len()) {
      let (l, r) = (left_common.get(idx), right_common.get(idx));
      if l == r {
        continue;
      }
      left_out_of_order.extend(l.copied());
      right_out_of_order.extend(r.copied());
    }

    let mut lines: Vec<String> = left_only.iter().map(|v| format!("-[{v}]")).collect();
    lines.extend(right_only.iter().map(|v| format!("+[{v}]")));
    if !left_out_of_order.is_empty() {
      let (l, r) = (left_out_of_order.join(", "), right_out_of_order.join(", "));
      if left_out_of_order.len() == right_out_of_order.len() {
        lines.push(format!("Only order of remaining entries differs: [{l}] vs [{r}]."));
      } else {
        lines.push(format!(
          "Order and repetition count of remaining entries differs: [{l}] vs [{r}]."
        ));
      }
    }
    lines
  }
}

fn path_of_value(value: &str) -> Option<String> {
  let start = value.find("path(")? + "path(".len();
  let rest = &value[start..];
  let (path, tail) = rest.split_once(':')?;
  let hash_end = tail.find(')')?;
  let hash = &tail[..hash_end];
  let is_word = !hash.is_empty() && hash.chars().all(|c| c.is_alphanumeric() || c == '_');
  (!path.is_empty() && is_word).then(|| path.to_string())
}
