use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TargetNode;
use crate::target::BuildTarget;

/// Source of declared target nodes.
pub trait TargetGraph: Send + Sync {
  fn node(&self, target: &BuildTarget) -> Option<Arc<TargetNode>>;

  /// All declared targets, sorted.
  fn targets(&self) -> Vec<BuildTarget>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTargetGraph {
  nodes: HashMap<BuildTarget, Arc<TargetNode>>,
}

impl InMemoryTargetGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_node(mut self, node: TargetNode) -> Self {
    self.add(node);
    self
  }

  /// Replaces any node already declared for the same target.
  pub fn add(&mut self, node: TargetNode) {
    self.nodes.insert(node.target.clone(), Arc::new(node));
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

impl TargetGraph for InMemoryTargetGraph {
  fn node(&self, target: &BuildTarget) -> Option<Arc<TargetNode>> {
    self.nodes.get(target).cloned()
  }

  fn targets(&self) -> Vec<BuildTarget> {
    let mut targets: Vec<_> = self.nodes.keys().cloned().collect();
    targets.sort();
    targets
  }
}

#[derive(Debug, Error)]
pub enum GraphLoadError {
  #[error("failed to read target graph {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse target graph {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("target {0} is declared more than once")]
  Duplicate(BuildTarget),

  #[error("declared target {0} must not carry flavors")]
  Flavored(BuildTarget),
}

/// On-disk JSON form of a target graph: `{ "targets": [ ... ] }`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TargetGraphFile {
  pub targets: Vec<TargetNode>,
}

impl TargetGraphFile {
  pub fn load(path: &Path) -> Result<InMemoryTargetGraph, GraphLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| GraphLoadError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let file: TargetGraphFile = serde_json::from_str(&text).map_err(|source| GraphLoadError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    file.into_graph()
  }

  pub fn into_graph(self) -> Result<InMemoryTargetGraph, GraphLoadError> {
    let mut graph = InMemoryTargetGraph::new();
    for node in self.targets {
      if node.target.is_flavored() {
        return Err(GraphLoadError::Flavored(node.target));
      }
      if graph.nodes.contains_key(&node.target) {
        return Err(GraphLoadError::Duplicate(node.target));
      }
      graph.add(node);
    }
    Ok(graph)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn loads_json_graph() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("targets.json");
    std::fs::write(
      &path,
      r#"{"targets": [
        {"target": "//:lib", "rule_type": "genrule", "srcs": ["lib.c"]},
        {"target": "//:app", "rule_type": "genrule", "deps": ["//:lib"],
         "steps": [{"type": "write_file", "path": "app.txt", "contents": "app"}]}
      ]}"#,
    )
    .unwrap();

    let graph = TargetGraphFile::load(&path).unwrap();
    assert_eq!(graph.len(), 2);
    let app = graph.node(&BuildTarget::parse("//:app", None).unwrap()).unwrap();
    assert_eq!(app.deps[0].to_string(), "//:lib");
    assert_eq!(graph.targets()[0].to_string(), "//:app");
  }

  #[test]
  fn duplicate_targets_are_rejected() {
    let node = TargetNode::new(BuildTarget::parse("//:a", None).unwrap(), "genrule");
    let file = TargetGraphFile {
      targets: vec![node.clone(), node],
    };
    assert!(matches!(file.into_graph(), Err(GraphLoadError::Duplicate(_))));
  }

  #[test]
  fn invalid_target_in_json_is_a_parse_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("targets.json");
    std::fs::write(&path, r#"{"targets": [{"target": "//:a#b!d", "rule_type": "x"}]}"#).unwrap();
    let err = TargetGraphFile::load(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid characters in flavor name"));
  }
}
