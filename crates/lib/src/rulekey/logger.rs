//! Structured record of what went into each rule key.
//!
//! Every scalar fed to a builder is logged as `(field, description)`; the
//! factory turns a finished builder's entries into a [`RuleKeyRecord`] and
//! hands it to an optional [`RuleKeyLogSink`]. Two JSON-lines logs written
//! this way can be compared with [`super::diff`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use super::types::RuleKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleKeyEntry {
  pub field: String,
  pub value: String,
}

/// Accumulates entries while a builder runs.
#[derive(Debug, Default)]
pub struct RuleKeyLogger {
  entries: Vec<RuleKeyEntry>,
}

impl RuleKeyLogger {
  pub fn add(&mut self, field: &str, value: String) {
    self.entries.push(RuleKeyEntry {
      field: field.to_string(),
      value,
    });
  }

  /// Fold a nested builder's entries in as `<prefix>.<field>`.
  pub fn absorb(&mut self, prefix: &str, entries: Vec<RuleKeyEntry>) {
    self.entries.extend(entries.into_iter().map(|e| RuleKeyEntry {
      field: format!("{prefix}.{}", e.field),
      value: e.value,
    }));
  }

  pub fn into_entries(self) -> Vec<RuleKeyEntry> {
    self.entries
  }
}

/// The full structure of one rule's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleKeyRecord {
  pub target: String,
  pub key: RuleKey,
  pub entries: Vec<RuleKeyEntry>,
}

impl RuleKeyRecord {
  /// Values grouped by field, each group in feed order.
  pub fn fields(&self) -> HashMap<&str, Vec<&str>> {
    let mut fields: HashMap<&str, Vec<&str>> = HashMap::new();
    for entry in &self.entries {
      fields.entry(&entry.field).or_default().push(&entry.value);
    }
    fields
  }
}

/// Destination for finished rule-key records.
pub trait RuleKeyLogSink: Send + Sync + std::fmt::Debug {
  fn record(&self, record: &RuleKeyRecord);
}

#[derive(Debug, Error)]
pub enum RuleKeyLogError {
  #[error("failed to access rule key log {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed rule key log {path} at line {line}: {source}")]
  Parse {
    path: PathBuf,
    line: usize,
    #[source]
    source: serde_json::Error,
  },
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesLogSink {
  path: PathBuf,
  writer: Mutex<BufWriter<File>>,
}

impl JsonLinesLogSink {
  pub fn create(path: impl Into<PathBuf>) -> Result<Self, RuleKeyLogError> {
    let path = path.into();
    let io_err = |source| RuleKeyLogError::Io {
      path: path.clone(),
      source,
    };
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = File::create(&path).map_err(io_err)?;
    Ok(Self {
      writer: Mutex::new(BufWriter::new(file)),
      path,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn flush(&self) -> Result<(), RuleKeyLogError> {
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.flush().map_err(|source| RuleKeyLogError::Io {
      path: self.path.clone(),
      source,
    })
  }
}

impl RuleKeyLogSink for JsonLinesLogSink {
  fn record(&self, record: &RuleKeyRecord) {
    let line = match serde_json::to_string(record) {
      Ok(line) => line,
      Err(e) => {
        tracing::warn!(target_name = %record.target, error = %e, "failed to serialize rule key record");
        return;
      }
    };
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writeln!(writer, "{line}") {
      tracing::warn!(path = %self.path.display(), error = %e, "failed to write rule key log");
    }
  }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
  records: Mutex<Vec<RuleKeyRecord>>,
}

impl MemoryLogSink {
  pub fn records(&self) -> Vec<RuleKeyRecord> {
    self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn to_log(&self) -> RuleKeyLog {
    RuleKeyLog::from_records(self.records())
  }
}

impl RuleKeyLogSink for MemoryLogSink {
  fn record(&self, record: &RuleKeyRecord) {
    trace!(target: "cachet::rulekey", target_name = %record.target, key = %record.key, "recorded rule key");
    self
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(record.clone());
  }
}

/// A parsed rule-key log, indexed by key and by target name.
#[derive(Debug, Default, Clone)]
pub struct RuleKeyLog {
  by_key: HashMap<RuleKey, RuleKeyRecord>,
  by_name: HashMap<String, RuleKey>,
}

impl RuleKeyLog {
  /// Later records for the same target replace earlier ones.
  pub fn from_records(records: impl IntoIterator<Item = RuleKeyRecord>) -> Self {
    let mut log = RuleKeyLog::default();
    for record in records {
      log.by_name.insert(record.target.clone(), record.key);
      log.by_key.insert(record.key, record);
    }
    log
  }

  pub fn load(path: &Path) -> Result<Self, RuleKeyLogError> {
    let file = File::open(path).map_err(|source| RuleKeyLogError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
      let line = line.map_err(|source| RuleKeyLogError::Io {
        path: path.to_path_buf(),
        source,
      })?;
      if line.trim().is_empty() {
        continue;
      }
      let record = serde_json::from_str(&line).map_err(|source| RuleKeyLogError::Parse {
        path: path.to_path_buf(),
        line: idx + 1,
        source,
      })?;
      records.push(record);
    }
    Ok(Self::from_records(records))
  }

  pub fn key_for(&self, target: &str) -> Option<RuleKey> {
    self.by_name.get(target).copied()
  }

  pub fn record(&self, key: &RuleKey) -> Option<&RuleKeyRecord> {
    self.by_key.get(key)
  }

  pub fn name_of(&self, key: &RuleKey) -> Option<&str> {
    self.by_key.get(key).map(|r| r.target.as_str())
  }

  pub fn len(&self) -> usize {
    self.by_key.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_key.is_empty()
  }
}
