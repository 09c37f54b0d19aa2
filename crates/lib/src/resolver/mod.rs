//! Turns target nodes into build rules, once per target.
//!
//! Rules live in an append-only arena addressed by [`RuleId`]. Resolving a
//! target first walks its unresolved dependency closure with an explicit
//! stack (detecting cycles), then constructs rules in post-order. Each target
//! has a `OnceLock` slot, so concurrent callers asking for the same target
//! block on a single construction and share its result.

mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::consts::GEN_DIR;
use crate::rule::{BuildRule, BuildRuleSpec, RuleId, TargetGraph, TargetNode};
use crate::target::{BuildTarget, TargetInterner};
use crate::tool::ToolProvider;

pub use types::ResolveError;

type Slot = Arc<OnceLock<Result<RuleId, ResolveError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
  InProgress,
  Done,
}

/// A node loaded during planning, with its dependency list.
struct Planned {
  target: BuildTarget,
  node: Arc<TargetNode>,
  deps: Vec<BuildTarget>,
}

pub struct BuildRuleResolver {
  graph: Arc<dyn TargetGraph>,
  tools: Arc<dyn ToolProvider>,
  output_root: PathBuf,
  rules: RwLock<Vec<Arc<BuildRule>>>,
  // Keys of `index` and `slots` share one allocation per target.
  targets: TargetInterner,
  index: DashMap<Arc<BuildTarget>, RuleId>,
  slots: DashMap<Arc<BuildTarget>, Slot>,
  constructions: AtomicUsize,
}

impl BuildRuleResolver {
  /// `output_root` is relative to the project root; rule outputs go under
  /// `<output_root>/gen/<base path>/<name>`.
  pub fn new(graph: Arc<dyn TargetGraph>, tools: Arc<dyn ToolProvider>, output_root: impl Into<PathBuf>) -> Self {
    Self {
      graph,
      tools,
      output_root: output_root.into(),
      rules: RwLock::new(Vec::new()),
      targets: TargetInterner::new(),
      index: DashMap::new(),
      slots: DashMap::new(),
      constructions: AtomicUsize::new(0),
    }
  }

  pub fn graph(&self) -> &Arc<dyn TargetGraph> {
    &self.graph
  }

  /// The rule for `target`, constructing it and its dependencies if needed.
  pub fn require_rule(&self, target: &BuildTarget) -> Result<Arc<BuildRule>, ResolveError> {
    if let Some(rule) = self.get_rule(target) {
      return Ok(rule);
    }

    let plan = self.plan(target)?;
    let mut last = None;
    for planned in &plan {
      last = Some(self.construct(planned)?);
    }

    let id = match last {
      Some(id) => id,
      // Another caller finished the target while we were planning.
      None => self.lookup(target).ok_or_else(|| {
        ResolveError::Internal(format!("{target} was planned but never constructed"))
      })?,
    };
    self
      .get(id)
      .ok_or_else(|| ResolveError::Internal(format!("rule {id} for {target} missing from arena")))
  }

  /// Insert a prebuilt rule.
  pub fn add_rule(&self, spec: BuildRuleSpec) -> Result<Arc<BuildRule>, ResolveError> {
    let target = spec.target.clone();
    let slot = self.slot(&target);
    let mut inserted = false;
    let result = slot
      .get_or_init(|| {
        inserted = true;
        Ok(self.insert(spec))
      })
      .clone();
    if !inserted {
      return Err(ResolveError::DuplicateRule(target));
    }
    let id = result?;
    self
      .get(id)
      .ok_or_else(|| ResolveError::Internal(format!("rule {id} for {target} missing from arena")))
  }

  pub fn get(&self, id: RuleId) -> Option<Arc<BuildRule>> {
    let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
    rules.get(id.0 as usize).cloned()
  }

  pub fn get_rule(&self, target: &BuildTarget) -> Option<Arc<BuildRule>> {
    self.lookup(target).and_then(|id| self.get(id))
  }

  pub fn lookup(&self, target: &BuildTarget) -> Option<RuleId> {
    self.index.get(target).map(|id| *id)
  }

  /// The shared handle for a target that has a rule.
  pub fn interned(&self, target: &BuildTarget) -> Option<Arc<BuildTarget>> {
    self.index.get(target).map(|entry| Arc::clone(entry.key()))
  }

  /// Distinct targets seen by this resolver, including failed ones.
  pub fn interned_targets(&self) -> usize {
    self.targets.len()
  }

  pub fn len(&self) -> usize {
    self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// How many rules were constructed from target nodes.
  pub fn constructions(&self) -> usize {
    self.constructions.load(Ordering::SeqCst)
  }

  /// `root` and everything it depends on, dependencies first.
  pub fn dependency_closure(&self, root: RuleId) -> Vec<RuleId> {
    let mut order = Vec::new();
    let mut state: HashMap<RuleId, Visit> = HashMap::new();
    let mut stack: Vec<(RuleId, Vec<RuleId>, usize)> = Vec::new();

    if let Some(rule) = self.get(root) {
      state.insert(root, Visit::InProgress);
      stack.push((root, rule.deps().collect(), 0));
    }

    while let Some(top) = stack.len().checked_sub(1) {
      let (id, next) = (stack[top].0, stack[top].2);
      if let Some(&dep) = stack[top].1.get(next) {
        stack[top].2 += 1;
        if state.contains_key(&dep) {
          continue;
        }
        if let Some(rule) = self.get(dep) {
          state.insert(dep, Visit::InProgress);
          stack.push((dep, rule.deps().collect(), 0));
        }
      } else {
        state.insert(id, Visit::Done);
        order.push(id);
        stack.pop();
      }
    }
    order
  }

  fn slot(&self, target: &BuildTarget) -> Slot {
    if let Some(slot) = self.slots.get(target) {
      return Arc::clone(slot.value());
    }
    let key = self.targets.intern(target.clone());
    Arc::clone(self.slots.entry(key).or_default().value())
  }

  /// Unresolved nodes reachable from `target`, dependencies first.
  fn plan(&self, target: &BuildTarget) -> Result<Vec<Planned>, ResolveError> {
    let mut planned: Vec<Planned> = Vec::new();
    let mut ids: HashMap<BuildTarget, usize> = HashMap::new();
    let mut state: Vec<Option<Visit>> = Vec::new();
    let mut order: Vec<usize> = Vec::new();

    let root = self.load(target, None)?;
    ids.insert(target.clone(), 0);
    planned.push(root);
    state.push(Some(Visit::InProgress));

    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    while let Some(top) = stack.len().checked_sub(1) {
      let (idx, next) = stack[top];
      let Some(dep) = planned[idx].deps.get(next).cloned() else {
        state[idx] = Some(Visit::Done);
        order.push(idx);
        stack.pop();
        continue;
      };
      stack[top].1 += 1;

      if self.index.contains_key(&dep) {
        continue;
      }
      let dep_idx = match ids.get(&dep) {
        Some(&i) => i,
        None => {
          let loaded = self.load(&dep, Some(&planned[idx].target))?;
          let i = planned.len();
          ids.insert(dep.clone(), i);
          planned.push(loaded);
          state.push(None);
          i
        }
      };

      match state[dep_idx] {
        Some(Visit::Done) => {}
        Some(Visit::InProgress) => {
          let start = stack.iter().position(|&(i, _)| i == dep_idx).unwrap_or(0);
          let mut chain: Vec<BuildTarget> = stack[start..]
            .iter()
            .map(|&(i, _)| planned[i].target.clone())
            .collect();
          chain.push(dep);
          return Err(ResolveError::CyclicDependency { chain });
        }
        None => {
          state[dep_idx] = Some(Visit::InProgress);
          stack.push((dep_idx, 0));
        }
      }
    }

    let mut slots: Vec<Option<Planned>> = planned.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
  }

  /// Flavored targets are declared by their unflavored node.
  fn load(&self, target: &BuildTarget, required_by: Option<&BuildTarget>) -> Result<Planned, ResolveError> {
    let node = self
      .graph
      .node(target)
      .or_else(|| target.is_flavored().then(|| self.graph.node(&target.unflavored())).flatten())
      .ok_or_else(|| ResolveError::NoSuchTarget {
        target: target.clone(),
        required_by: required_by.cloned(),
      })?;
    let deps = node.all_deps();
    Ok(Planned {
      target: target.clone(),
      node,
      deps,
    })
  }

  fn construct(&self, planned: &Planned) -> Result<RuleId, ResolveError> {
    let slot = self.slot(&planned.target);
    slot.get_or_init(|| self.build_rule(planned)).clone()
  }

  fn build_rule(&self, planned: &Planned) -> Result<RuleId, ResolveError> {
    let target = &planned.target;
    let node = &planned.node;

    let declared_deps = node
      .deps
      .iter()
      .map(|dep| self.dependency_id(target, dep))
      .collect::<Result<Vec<_>, _>>()?;
    let extra_deps = planned
      .deps
      .iter()
      .filter(|dep| !node.deps.contains(dep))
      .map(|dep| self.dependency_id(target, dep))
      .collect::<Result<Vec<_>, _>>()?;

    let tool = node
      .tool
      .as_ref()
      .map(|tool| self.tools.resolve(tool))
      .transpose()
      .map_err(|source| ResolveError::Tool {
        target: target.clone(),
        source,
      })?;

    let output_dir = self
      .output_root
      .join(GEN_DIR)
      .join(target.base_path())
      .join(target.short_name_and_flavor_postfix());

    let spec = BuildRuleSpec {
      target: target.clone(),
      rule_type: node.rule_type.clone(),
      declared_deps,
      extra_deps,
      srcs: node.srcs.clone(),
      args: node.args.clone(),
      tool,
      options: node
        .options
        .iter()
        .map(|(name, set)| (name.clone(), Arc::new(set.clone())))
        .collect(),
      steps: node.steps.clone(),
      output_dir,
    };

    let id = self.insert(spec);
    self.constructions.fetch_add(1, Ordering::SeqCst);
    debug!(rule = %target, id = %id, "constructed build rule");
    Ok(id)
  }

  fn dependency_id(&self, target: &BuildTarget, dep: &BuildTarget) -> Result<RuleId, ResolveError> {
    if let Some(id) = self.lookup(dep) {
      return Ok(id);
    }
    let outcome = self.slots.get(dep).and_then(|slot| slot.get().cloned());
    match outcome {
      Some(Ok(id)) => Ok(id),
      Some(Err(_)) => Err(ResolveError::DependencyFailed {
        target: target.clone(),
        dependency: dep.clone(),
      }),
      None => Err(ResolveError::Internal(format!(
        "{dep} required by {target} was not constructed first"
      ))),
    }
  }

  fn insert(&self, spec: BuildRuleSpec) -> RuleId {
    let target = spec.target.clone();
    let id = {
      let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
      let id = RuleId(rules.len() as u32);
      rules.push(Arc::new(BuildRule::new(id, spec)));
      id
    };
    trace!(rule = %target, id = %id, "indexed build rule");
    self.index.insert(self.targets.intern(target), id);
    id
  }
}
