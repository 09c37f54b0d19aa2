//! Scheduling graph over resolved build rules.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::EngineError;
use crate::resolver::BuildRuleResolver;
use crate::rule::{BuildRule, RuleId};

/// Rules to build, with an edge from each dependency to its dependent.
pub struct RuleDag {
  graph: DiGraph<RuleId, ()>,
  nodes: HashMap<RuleId, NodeIndex>,
}

impl RuleDag {
  /// The dependency closure of `roots`, taken from the resolver's arena.
  pub fn from_roots(resolver: &BuildRuleResolver, roots: &[Arc<BuildRule>]) -> Result<Self, EngineError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for root in roots {
      for id in resolver.dependency_closure(root.id()).into_iter().chain([root.id()]) {
        nodes.entry(id).or_insert_with(|| graph.add_node(id));
      }
    }

    let ids: Vec<RuleId> = nodes.keys().copied().collect();
    for id in ids {
      let Some(rule) = resolver.get(id) else {
        continue;
      };
      let dependent = nodes[&id];
      for dep in rule.deps() {
        if let Some(&dep_idx) = nodes.get(&dep)
          && graph.find_edge(dep_idx, dependent).is_none()
        {
          graph.add_edge(dep_idx, dependent, ());
        }
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic(resolver)?;
    Ok(dag)
  }

  fn verify_acyclic(&self, resolver: &BuildRuleResolver) -> Result<(), EngineError> {
    toposort(&self.graph, None).map_err(|cycle| {
      let id = self.graph[cycle.node_id()];
      match resolver.get(id) {
        Some(rule) => EngineError::CycleDetected(rule.target().clone()),
        None => EngineError::NoTargets,
      }
    })?;
    Ok(())
  }

  /// Rules in an order where dependencies come first.
  pub fn topological_order(&self) -> Vec<RuleId> {
    toposort(&self.graph, None)
      .map(|order| order.into_iter().map(|idx| self.graph[idx]).collect())
      .unwrap_or_default()
  }

  pub fn dependencies(&self, id: RuleId) -> Vec<RuleId> {
    self.neighbors(id, Direction::Incoming)
  }

  pub fn dependents(&self, id: RuleId) -> Vec<RuleId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: RuleId, direction: Direction) -> Vec<RuleId> {
    let Some(&idx) = self.nodes.get(&id) else {
      return Vec::new();
    };
    let mut ids: Vec<RuleId> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n])
      .collect();
    ids.sort();
    ids
  }

  pub fn rules(&self) -> impl Iterator<Item = RuleId> + '_ {
    self.nodes.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}
