use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rulekey::{MapOrder, Value};

/// A free-form rule argument from the target graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  List(Vec<ArgValue>),
  Map(BTreeMap<String, ArgValue>),
}

impl From<&ArgValue> for Value {
  fn from(arg: &ArgValue) -> Self {
    match arg {
      ArgValue::Bool(b) => Value::Bool(*b),
      ArgValue::Int(n) => Value::from(*n),
      ArgValue::Float(f) => Value::from(*f),
      ArgValue::Str(s) => Value::Str(s.clone()),
      ArgValue::List(items) => Value::List(items.iter().map(Value::from).collect()),
      ArgValue::Map(map) => Value::Map(
        MapOrder::Sorted,
        map
          .iter()
          .map(|(k, v)| (Value::Str(k.clone()), Value::from(v)))
          .collect(),
      ),
    }
  }
}

impl From<&str> for ArgValue {
  fn from(s: &str) -> Self {
    ArgValue::Str(s.to_string())
  }
}
