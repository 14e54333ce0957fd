//! Per-build node data, partitioned into cache scopes.
//!
//! Every lookup is keyed by `(scope, node, stage)`. A scope created with `parent = true`
//! never owns entries: reads and writes land in the nearest isolated ancestor, so a node
//! counts the same whether the inner or the outer reference is visited first. An isolated
//! scope keeps its own partition. Scope ids are derived from `(enclosing scope, cache
//! node)` so repeated visits of the same cache node land in the same scope.

use std::collections::HashMap;

use super::context::FrameId;
use super::graph::NodeId;
use super::types::ShaderStage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

/// Identifies the flow block a snippet was emitted into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// A materialized expression and the block it was declared in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedSnippet {
    pub code: String,
    pub block: BlockId,
    /// Context frame the value was computed under; `None` for variables, which keep their
    /// identity across frames.
    pub frame: Option<FrameId>,
}

#[derive(Clone, Debug, Default)]
pub struct NodeData {
    /// Number of parent edges reaching the node during analysis.
    pub usage: u32,
    pub snippet: Option<CachedSnippet>,
}

#[derive(Clone, Copy, Debug)]
struct ScopeInfo {
    parent: Option<ScopeId>,
}

/// Stage key; `None` is the stage-independent "any" partition.
pub type CacheStage = Option<ShaderStage>;

#[derive(Debug)]
pub struct NodeCache {
    scopes: Vec<ScopeInfo>,
    derived: HashMap<(ScopeId, NodeId), ScopeId>,
    entries: HashMap<(ScopeId, NodeId, CacheStage), NodeData>,
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeInfo { parent: None }],
            derived: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Scope entered when `cache_node` is visited from `enclosing`.
    pub fn scope_for(&mut self, enclosing: ScopeId, cache_node: NodeId, parent: bool) -> ScopeId {
        if let Some(id) = self.derived.get(&(enclosing, cache_node)) {
            return *id;
        }
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeInfo {
            parent: parent.then_some(enclosing),
        });
        self.derived.insert((enclosing, cache_node), id);
        id
    }

    /// Outermost scope reachable from `scope` through parent links.
    fn owner(&self, scope: ScopeId) -> ScopeId {
        let mut current = scope;
        while let Some(parent) = self.scopes.get(current.0 as usize).and_then(|info| info.parent) {
            current = parent;
        }
        current
    }

    pub fn get(&self, scope: ScopeId, node: NodeId, stage: CacheStage) -> Option<&NodeData> {
        self.entries.get(&(self.owner(scope), node, stage))
    }

    pub fn entry(&mut self, scope: ScopeId, node: NodeId, stage: CacheStage) -> &mut NodeData {
        let owner = self.owner(scope);
        self.entries.entry((owner, node, stage)).or_default()
    }

    pub fn usage(&self, scope: ScopeId, node: NodeId, stage: CacheStage) -> u32 {
        self.get(scope, node, stage).map_or(0, |d| d.usage)
    }
}
