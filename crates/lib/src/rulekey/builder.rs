//! Byte-level encoding of values into a rule key.
//!
//! Every scalar is written as `<pending keys, each followed by \0><tag><bytes>\0`.
//! The key path is flushed lazily, so a list writes its key once per element
//! and an empty list writes nothing at all.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::logger::{RuleKeyEntry, RuleKeyLogger};
use super::types::{AppendsToRuleKey, MapOrder, Num, RuleKey, RuleKeyError, Value, tag};
use crate::consts::RULE_KEY_SEPARATOR;
use crate::hasher::{ArchiveMemberPath, ContentHasher};
use crate::rule::{RuleId, SourcePath};
use crate::target::BuildTarget;
use crate::util::hash::ContentHash;

/// Supplies finalized keys of other rules to a builder.
pub trait RuleKeySource: Sync {
  fn rule_key(&self, id: RuleId) -> Result<RuleKey, RuleKeyError>;

  /// The rule producing `target`, if it is in the resolver index.
  fn rule_for_target(&self, target: &BuildTarget) -> Option<RuleId>;
}

pub struct RuleKeyBuilder<'a> {
  hasher: Sha256,
  key_stack: Vec<String>,
  content: &'a ContentHasher,
  rules: Option<&'a dyn RuleKeySource>,
  log: RuleKeyLogger,
}

impl<'a> RuleKeyBuilder<'a> {
  pub fn new(content: &'a ContentHasher) -> Self {
    Self {
      hasher: Sha256::new(),
      key_stack: Vec::new(),
      content,
      rules: None,
      log: RuleKeyLogger::default(),
    }
  }

  /// Allow rule references and build-target source paths.
  pub fn with_rules(mut self, rules: &'a dyn RuleKeySource) -> Self {
    self.rules = Some(rules);
    self
  }

  pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<&mut Self, RuleKeyError> {
    let value = value.into();
    self.set_value(key, &value)?;
    Ok(self)
  }

  /// Hash `absolute` and record it under `ideally_relative`.
  ///
  /// An absolute `ideally_relative` would make the key machine-specific, so
  /// only its file name is used.
  pub fn set_path(
    &mut self,
    key: &str,
    absolute: &Path,
    ideally_relative: &Path,
  ) -> Result<&mut Self, RuleKeyError> {
    self.with_key(key, |b| b.feed_path(key, absolute, ideally_relative))?;
    Ok(self)
  }

  pub fn build(self) -> RuleKey {
    self.build_with_log().0
  }

  /// Finish the key and return the structured log alongside it.
  pub fn build_with_log(self) -> (RuleKey, Vec<RuleKeyEntry>) {
    let digest: [u8; 32] = self.hasher.finalize().into();
    (RuleKey::from_bytes(digest), self.log.into_entries())
  }

  fn with_key(
    &mut self,
    key: &str,
    f: impl FnOnce(&mut Self) -> Result<(), RuleKeyError>,
  ) -> Result<(), RuleKeyError> {
    let depth = self.key_stack.len();
    self.key_stack.push(key.to_string());
    let result = f(self);
    self.key_stack.truncate(depth);
    result
  }

  fn set_value(&mut self, key: &str, value: &Value) -> Result<(), RuleKeyError> {
    match value {
      Value::Appendable(appendable) => self.set_appendable(key, appendable.as_ref()),
      Value::List(items) => self.with_key(key, |b| {
        items.iter().try_for_each(|item| b.set_value(key, item))
      }),
      Value::Map(order, entries) => self.with_key(key, |b| b.set_map(key, *order, entries)),
      scalar => self.with_key(key, |b| b.set_scalar(key, scalar)),
    }
  }

  fn set_map(
    &mut self,
    key: &str,
    order: MapOrder,
    entries: &[(Value, Value)],
  ) -> Result<(), RuleKeyError> {
    if order == MapOrder::Unordered {
      info!(
        "Adding an unsorted map to the rule key ({key}). Expect unstable ordering and caches misses"
      );
    }
    self.feed(tag::MAP_START, b"{");
    for (k, v) in entries {
      self.set_value(key, k)?;
      self.feed(tag::MAP_ARROW, b" -> ");
      self.set_value(key, v)?;
    }
    self.feed(tag::MAP_END, b"}");
    Ok(())
  }

  fn set_scalar(&mut self, key: &str, value: &Value) -> Result<(), RuleKeyError> {
    match value {
      Value::Null => {
        self.log.add(key, "null".to_string());
        self.feed(tag::NULL, b"");
      }
      Value::Bool(b) => {
        self.log.add(key, format!("boolean({b})"));
        self.feed(tag::BOOL, if *b { b"t" } else { b"f" });
      }
      Value::Enum(s) => {
        self.log.add(key, format!("enum({s})"));
        self.feed(tag::ENUM, s.as_bytes());
      }
      Value::Number(n) => self.feed_number(key, *n)?,
      Value::Str(s) => {
        self.log.add(key, format!("string({s:?})"));
        self.feed(tag::STR, s.as_bytes());
      }
      Value::Pattern(p) => {
        self.log.add(key, format!("pattern({p:?})"));
        self.feed(tag::PATTERN, p.as_bytes());
      }
      Value::Bytes(bytes) => {
        self.log.add(key, format!("byteArray(length={})", bytes.len()));
        self.feed(tag::BYTES, bytes);
      }
      Value::Target(target) => {
        let name = target.fully_qualified_name();
        self.log.add(key, format!("target({name})"));
        self.feed(tag::TARGET, name.as_bytes());
      }
      Value::Path(path) => self.feed_source_path(key, path)?,
      Value::NonHashingPath(path) => {
        let text = slash_string(path);
        self.log.add(key, format!("nonHashingPath({text})"));
        self.feed(tag::NON_HASHING_PATH, text.as_bytes());
      }
      Value::RuleRef(id) => self.feed_rule(key, *id)?,
      Value::RuleKey(rule_key) => self.feed_rule_key(key, rule_key),
      Value::List(_) | Value::Map(..) | Value::Appendable(_) => {
        return Err(RuleKeyError::UnsupportedValueType {
          key: key.to_string(),
          reason: "collection passed where a scalar was expected".to_string(),
        });
      }
    }
    Ok(())
  }

  fn feed_number(&mut self, key: &str, n: Num) -> Result<(), RuleKeyError> {
    let nan = matches!(n, Num::F32(f) if f.is_nan()) || matches!(n, Num::F64(f) if f.is_nan());
    if nan {
      return Err(RuleKeyError::UnsupportedValueType {
        key: key.to_string(),
        reason: "NaN has no canonical encoding".to_string(),
      });
    }
    self.log.add(key, format!("number({n})"));
    match n {
      Num::I16(v) => self.feed(tag::I16, &v.to_be_bytes()),
      Num::I32(v) => self.feed(tag::I32, &v.to_be_bytes()),
      Num::I64(v) => self.feed(tag::I64, &v.to_be_bytes()),
      Num::F32(v) => self.feed(tag::F32, &v.to_bits().to_be_bytes()),
      Num::F64(v) => self.feed(tag::F64, &v.to_bits().to_be_bytes()),
    }
    Ok(())
  }

  fn feed_source_path(&mut self, key: &str, path: &SourcePath) -> Result<(), RuleKeyError> {
    match path {
      SourcePath::Relative(rel) => {
        let absolute = self.content.filesystem().resolve(rel);
        self.feed_path(key, &absolute, rel)
      }
      SourcePath::Absolute(absolute) => self.feed_path(key, absolute, absolute),
      SourcePath::ArchiveMember(member) => self.feed_archive_member(key, member),
      SourcePath::BuildTargetOutput(target) => {
        let rules = self.require_rules(key)?;
        let id = rules
          .rule_for_target(target)
          .ok_or_else(|| RuleKeyError::RuleNotIndexed(target.clone()))?;
        let text = target.fully_qualified_name();
        self.log.add(key, format!("buildTargetSourcePath({text})"));
        self.feed(tag::STR, text.as_bytes());
        self.feed_rule(key, id)
      }
    }
  }

  fn feed_path(
    &mut self,
    key: &str,
    absolute: &Path,
    ideally_relative: &Path,
  ) -> Result<(), RuleKeyError> {
    let hash = self
      .content
      .hash(absolute)
      .map_err(|source| RuleKeyError::MissingContentHash {
        path: absolute.to_path_buf(),
        source,
      })?;
    let recorded = portable_path(ideally_relative);
    self.feed_hashed(key, tag::PATH, &slash_string(&recorded), &hash);
    Ok(())
  }

  fn feed_archive_member(&mut self, key: &str, member: &ArchiveMemberPath) -> Result<(), RuleKeyError> {
    let hash = self
      .content
      .hash_archive_member(member)
      .map_err(|source| RuleKeyError::MissingContentHash {
        path: PathBuf::from(member.to_string()),
        source,
      })?;
    let recorded = ArchiveMemberPath::new(portable_path(&member.archive), member.member.clone());
    self.feed_hashed(key, tag::ARCHIVE_MEMBER, &recorded.to_string(), &hash);
    Ok(())
  }

  fn feed_hashed(&mut self, key: &str, path_tag: u8, text: &str, hash: &ContentHash) {
    self.log.add(key, format!("path({text}:{hash})"));
    self.feed(path_tag, text.as_bytes());
    self.feed(tag::HASH, hash.as_str().as_bytes());
  }

  fn feed_rule(&mut self, key: &str, id: RuleId) -> Result<(), RuleKeyError> {
    let rule_key = self.require_rules(key)?.rule_key(id)?;
    self.feed_rule_key(key, &rule_key);
    Ok(())
  }

  fn feed_rule_key(&mut self, key: &str, rule_key: &RuleKey) {
    self.log.add(key, format!("ruleKey(sha256={rule_key})"));
    self.feed(tag::RULE_KEY, rule_key.as_bytes());
  }

  fn set_appendable(&mut self, key: &str, appendable: &dyn AppendsToRuleKey) -> Result<(), RuleKeyError> {
    let mut sub = RuleKeyBuilder {
      hasher: Sha256::new(),
      key_stack: Vec::new(),
      content: self.content,
      rules: self.rules,
      log: RuleKeyLogger::default(),
    };
    appendable.append_to_rule_key(&mut sub)?;
    let (sub_key, entries) = sub.build_with_log();

    // Only the nested fields are logged so a diff can point at the one that changed.
    self.log.absorb(key, entries);
    self.with_key(&format!("{key}.appendableSubKey"), |b| {
      b.feed(tag::RULE_KEY, sub_key.as_bytes());
      Ok(())
    })
  }

  fn require_rules(&self, key: &str) -> Result<&'a dyn RuleKeySource, RuleKeyError> {
    self.rules.ok_or_else(|| RuleKeyError::UnsupportedValueType {
      key: key.to_string(),
      reason: "rule reference without a rule key factory".to_string(),
    })
  }

  fn flush_key_stack(&mut self) {
    while let Some(key) = self.key_stack.pop() {
      self.hasher.update(key.as_bytes());
      self.hasher.update([RULE_KEY_SEPARATOR]);
    }
  }

  fn feed(&mut self, type_tag: u8, bytes: &[u8]) {
    self.flush_key_stack();
    self.hasher.update([type_tag]);
    self.hasher.update(bytes);
    self.hasher.update([RULE_KEY_SEPARATOR]);
  }
}

/// Absolute paths are reduced to their file name.
fn portable_path(path: &Path) -> PathBuf {
  if !path.is_absolute() {
    return path.to_path_buf();
  }
  warn!(
    "Attempting to add absolute path to rule key. Only using file name: {}",
    path.display()
  );
  path.file_name().map(PathBuf::from).unwrap_or_default()
}

fn slash_string(path: &Path) -> String {
  path.to_string_lossy().replace('\\', "/")
}
