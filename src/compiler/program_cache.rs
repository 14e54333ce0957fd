//! Memoized builds keyed by graph identity and version.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::builder::{BuildOptions, BuildRequest, NodeBuilder};
use super::error::BuildResult;
use super::graph::NodeGraph;
use super::state::NodeBuilderState;

#[derive(Debug, Default)]
struct GraphPrograms {
    version: u64,
    programs: HashMap<u64, Arc<NodeBuilderState>>,
}

/// Caches [`NodeBuilderState`]s per graph instance.
///
/// Entries are keyed by `(graph uid, graph version, request, options)`. Mutating a graph
/// bumps its version, so the next lookup rebuilds and drops every program built from an
/// older version of that graph.
#[derive(Debug, Default)]
pub struct ProgramCache {
    graphs: HashMap<u64, GraphPrograms>,
    hits: u64,
    misses: u64,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        graph: &NodeGraph,
        request: &BuildRequest,
        options: &BuildOptions,
    ) -> BuildResult<Arc<NodeBuilderState>> {
        let key = signature(request, options);
        let entry = self.graphs.entry(graph.uid()).or_default();
        if entry.version != graph.version() {
            if !entry.programs.is_empty() {
                debug!(graph = graph.uid(), version = graph.version(), "graph changed, evicting programs");
            }
            entry.programs.clear();
            entry.version = graph.version();
        }
        if let Some(state) = entry.programs.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(state));
        }
        self.misses += 1;
        let state = Arc::new(NodeBuilder::new(graph, options.clone()).build(request)?);
        entry.programs.insert(key, Arc::clone(&state));
        Ok(state)
    }

    /// Number of cached programs across all graphs.
    pub fn len(&self) -> usize {
        self.graphs.values().map(|g| g.programs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything cached for the graph with `uid`.
    pub fn forget(&mut self, uid: u64) {
        self.graphs.remove(&uid);
    }

    pub fn clear(&mut self) {
        self.graphs.clear();
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

fn signature(request: &BuildRequest, options: &BuildOptions) -> u64 {
    let payload = json!({ "request": request, "options": options });
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    fnv1a64(&bytes)
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{Dialect, NodeType};

    fn graph() -> (NodeGraph, BuildRequest) {
        let mut g = NodeGraph::new();
        let t = g.uniform("time", NodeType::Float);
        let s = g.sin(t);
        (g, BuildRequest::new().fragment(s))
    }

    #[test]
    fn test_second_lookup_hits() {
        let (g, req) = graph();
        let mut cache = ProgramCache::new();
        let opts = BuildOptions::default();
        let a = cache.get_or_build(&g, &req, &opts).unwrap();
        let b = cache.get_or_build(&g, &req, &opts).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_dialect_is_part_of_the_key() {
        let (g, req) = graph();
        let mut cache = ProgramCache::new();
        let wgsl = cache.get_or_build(&g, &req, &BuildOptions::default()).unwrap();
        let glsl = cache
            .get_or_build(&g, &req, &BuildOptions::default().with_dialect(Dialect::Glsl))
            .unwrap();
        assert_eq!(wgsl.dialect(), Dialect::Wgsl);
        assert_eq!(glsl.dialect(), Dialect::Glsl);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_mutation_evicts_old_programs() {
        let (mut g, req) = graph();
        let mut cache = ProgramCache::new();
        let opts = BuildOptions::default();
        let before = cache.get_or_build(&g, &req, &opts).unwrap();
        let root = req.root(crate::compiler::types::ShaderStage::Fragment).unwrap();
        let t = g.uniform("time", NodeType::Float);
        g.replace(root, crate::compiler::graph::NodeKind::Math {
            method: crate::compiler::graph::MathMethod::Cos,
            args: vec![t],
        });
        let after = cache.get_or_build(&g, &req, &opts).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.fragment_shader().unwrap().contains("cos("));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cloned_graphs_are_cached_separately() {
        let (g, req) = graph();
        let copy = g.clone();
        let mut cache = ProgramCache::new();
        let opts = BuildOptions::default();
        cache.get_or_build(&g, &req, &opts).unwrap();
        cache.get_or_build(&copy, &req, &opts).unwrap();
        assert_eq!(cache.stats(), (0, 2));
        cache.forget(copy.uid());
        assert_eq!(cache.len(), 1);
    }
}
