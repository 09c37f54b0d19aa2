use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::builder::RuleKeyBuilder;
use crate::hasher::HashError;
use crate::rule::{RuleId, SourcePath};
use crate::target::BuildTarget;

/// A finalized 256-bit rule key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleKey([u8; 32]);

impl RuleKey {
  pub fn from_bytes(bytes: [u8; 32]) -> Self {
    RuleKey(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl fmt::Display for RuleKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rule key {0:?}: expected 64 hex characters")]
pub struct InvalidRuleKey(pub String);

impl FromStr for RuleKey {
  type Err = InvalidRuleKey;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let bytes = hex::decode(s).map_err(|_| InvalidRuleKey(s.to_string()))?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| InvalidRuleKey(s.to_string()))?;
    Ok(RuleKey(bytes))
  }
}

impl TryFrom<String> for RuleKey {
  type Error = InvalidRuleKey;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<RuleKey> for String {
  fn from(key: RuleKey) -> Self {
    key.to_hex()
  }
}

/// Numbers keep their width so `1i32` and `1i64` hash differently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
  I16(i16),
  I32(i32),
  I64(i64),
  F32(f32),
  F64(f64),
}

impl fmt::Display for Num {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Num::I16(n) => write!(f, "{n}"),
      Num::I32(n) => write!(f, "{n}"),
      Num::I64(n) => write!(f, "{n}"),
      Num::F32(n) => write!(f, "{n}"),
      Num::F64(n) => write!(f, "{n}"),
    }
  }
}

/// How the entries of a [`Value::Map`] were ordered by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOrder {
  Sorted,
  Insertion,
  /// Iteration order of a hash map; hashed as given but logged as unstable.
  Unordered,
}

/// Everything that can be fed into a [`RuleKeyBuilder`].
#[derive(Debug, Clone)]
pub enum Value {
  Null,
  Bool(bool),
  Enum(String),
  Number(Num),
  Str(String),
  Pattern(String),
  Bytes(Vec<u8>),
  Target(BuildTarget),
  /// A source path whose contents are hashed.
  Path(SourcePath),
  /// A path that contributes only its name, never its contents.
  NonHashingPath(PathBuf),
  List(Vec<Value>),
  Map(MapOrder, Vec<(Value, Value)>),
  /// Another rule; contributes that rule's finalized key.
  RuleRef(RuleId),
  RuleKey(RuleKey),
  Appendable(Arc<dyn AppendsToRuleKey>),
}

impl Value {
  pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
    Value::List(items.into_iter().map(Into::into).collect())
  }

  pub fn appendable(value: impl AppendsToRuleKey + 'static) -> Self {
    Value::Appendable(Arc::new(value))
  }
}

/// A structured value that contributes to a rule key through its own fields.
///
/// The fields are hashed by a fresh builder and the resulting key is folded
/// into the parent under `<key>.appendableSubKey`.
pub trait AppendsToRuleKey: fmt::Debug + Send + Sync {
  fn append_to_rule_key(&self, builder: &mut RuleKeyBuilder<'_>) -> Result<(), RuleKeyError>;
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i16> for Value {
  fn from(v: i16) -> Self {
    Value::Number(Num::I16(v))
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Number(Num::I32(v))
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Number(Num::I64(v))
  }
}

impl From<f32> for Value {
  fn from(v: f32) -> Self {
    Value::Number(Num::F32(v))
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Number(Num::F64(v))
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Str(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Str(v)
  }
}

impl From<&String> for Value {
  fn from(v: &String) -> Self {
    Value::Str(v.clone())
  }
}

impl From<BuildTarget> for Value {
  fn from(v: BuildTarget) -> Self {
    Value::Target(v)
  }
}

impl From<SourcePath> for Value {
  fn from(v: SourcePath) -> Self {
    Value::Path(v)
  }
}

impl From<RuleId> for Value {
  fn from(v: RuleId) -> Self {
    Value::RuleRef(v)
  }
}

impl From<RuleKey> for Value {
  fn from(v: RuleKey) -> Self {
    Value::RuleKey(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map_or(Value::Null, Into::into)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(v: Vec<T>) -> Self {
    Value::list(v)
  }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
  fn from(map: BTreeMap<K, V>) -> Self {
    Value::Map(
      MapOrder::Sorted,
      map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    )
  }
}

impl<K: Into<Value>, V: Into<Value>, S> From<HashMap<K, V, S>> for Value {
  fn from(map: HashMap<K, V, S>) -> Self {
    Value::Map(
      MapOrder::Unordered,
      map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    )
  }
}

#[derive(Debug, Error)]
pub enum RuleKeyError {
  #[error("Unsupported value type for rule key field '{key}': {reason}")]
  UnsupportedValueType { key: String, reason: String },

  #[error("No SHA for {path}")]
  MissingContentHash {
    path: PathBuf,
    #[source]
    source: HashError,
  },

  #[error("no build rule for {0} in the resolver index")]
  RuleNotIndexed(BuildTarget),

  #[error("unknown rule id {0}")]
  UnknownRule(RuleId),
}

/// One-byte tags written before every scalar so values of different types
/// never share an encoding.
pub(super) mod tag {
  pub const NULL: u8 = b'0';
  pub const BOOL: u8 = b'b';
  pub const ENUM: u8 = b'e';
  pub const I16: u8 = b'h';
  pub const I32: u8 = b'i';
  pub const I64: u8 = b'l';
  pub const F32: u8 = b'f';
  pub const F64: u8 = b'd';
  pub const STR: u8 = b's';
  pub const PATTERN: u8 = b'p';
  pub const BYTES: u8 = b'y';
  pub const TARGET: u8 = b't';
  pub const PATH: u8 = b'P';
  pub const ARCHIVE_MEMBER: u8 = b'A';
  pub const HASH: u8 = b'H';
  pub const NON_HASHING_PATH: u8 = b'N';
  pub const RULE_KEY: u8 = b'k';
  pub const MAP_START: u8 = b'{';
  pub const MAP_ARROW: u8 = b'>';
  pub const MAP_END: u8 = b'}';
}
