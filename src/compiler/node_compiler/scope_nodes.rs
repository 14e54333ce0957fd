//! Compilers for context overrides and cache scopes.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::error::BuildResult;
use crate::compiler::graph::NodeId;

/// Build `node` with `values` pushed onto the context stack.
pub fn compile_context(
    b: &mut NodeBuilder,
    id: NodeId,
    node: NodeId,
    values: Vec<(String, NodeId)>,
) -> BuildResult<String> {
    b.in_context(id, values, |b| b.build_node(node, None))
}

pub fn compile_context_value(
    b: &mut NodeBuilder,
    key: &str,
    fallback: Option<NodeId>,
) -> BuildResult<String> {
    b.with_context_value(key, fallback, |b, node| b.build_node(node, None))
}

/// Build `node` inside the cache scope owned by `id`.
///
/// An isolated scope (`parent == false`) counts usage and materializes temps on its own;
/// a parent scope shares both with the enclosing scope.
pub fn compile_cache(b: &mut NodeBuilder, id: NodeId, node: NodeId, parent: bool) -> BuildResult<String> {
    let scope = b.cache_scope(id, parent);
    b.in_scope(scope, |b| b.build_node(node, None))
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{build_fragment, fragment_source};
    use crate::compiler::graph::NodeGraph;
    use crate::compiler::types::{Dialect, NodeType};

    fn shared_sin(parent: bool, cached_first: bool) -> String {
        let mut g = NodeGraph::new();
        let t = g.uniform("time", NodeType::Float);
        let s = g.sin(t);
        let cached = g.cache(s, parent);
        let sum = if cached_first { g.add(cached, s) } else { g.add(s, cached) };
        fragment_source(&g, sum, Dialect::Wgsl)
    }

    #[test]
    fn test_isolated_cache_inlines_each_use() {
        let src = shared_sin(false, false);
        assert!(
            src.contains("return vec4<f32>((sin(objectUniforms.time) + sin(objectUniforms.time)));"),
            "{src}"
        );
    }

    #[test]
    fn test_parent_cache_shares_temps() {
        let src = shared_sin(true, false);
        assert!(src.contains("let nodeVar0: f32 = sin(objectUniforms.time);"), "{src}");
        assert!(src.contains("return vec4<f32>((nodeVar0 + nodeVar0));"), "{src}");
    }

    #[test]
    fn test_parent_cache_shares_temps_when_visited_first() {
        let src = shared_sin(true, true);
        assert_eq!(src.matches("sin(objectUniforms.time)").count(), 1, "{src}");
        assert!(src.contains("let nodeVar0: f32 = sin(objectUniforms.time);"), "{src}");
        assert!(src.contains("return vec4<f32>((nodeVar0 + nodeVar0));"), "{src}");
    }

    #[test]
    fn test_context_provides_texture_uv() {
        let mut g = NodeGraph::new();
        let tex = g.texture("map", None);
        let uv = g.vec2(0.25, 0.75);
        let ctx = g.context(tex, &[("uv", uv)]);
        let src = fragment_source(&g, ctx, Dialect::Wgsl);
        assert!(src.contains("textureSample(map, map_sampler, vec2<f32>(0.25, 0.75))"), "{src}");
        assert!(!src.contains("v_uv"), "{src}");
    }

    #[test]
    fn test_same_node_under_two_contexts() {
        let mut g = NodeGraph::new();
        let tex = g.texture("map", None);
        let a = g.vec2(0.0, 0.0);
        let b = g.vec2(1.0, 1.0);
        let first = g.context(tex, &[("uv", a)]);
        let second = g.context(tex, &[("uv", b)]);
        let sum = g.add(first, second);
        let src = fragment_source(&g, sum, Dialect::Glsl);
        assert!(src.contains("vec4 nodeVar0 = texture(sampler2D(map, map_sampler), vec2(0.0, 0.0));"), "{src}");
        assert!(src.contains("vec4 nodeVar1 = texture(sampler2D(map, map_sampler), vec2(1.0, 1.0));"), "{src}");
        assert!(src.contains("fragColor = (nodeVar0 + nodeVar1);"), "{src}");
    }

    #[test]
    fn test_inner_context_shadows_outer() {
        let mut g = NodeGraph::new();
        let key = g.context_value("gain", None);
        let inner_gain = g.float(2.0);
        let outer_gain = g.float(3.0);
        let inner = g.context(key, &[("gain", inner_gain)]);
        let outer = g.context(inner, &[("gain", outer_gain)]);
        let src = fragment_source(&g, outer, Dialect::Wgsl);
        assert!(src.contains("return vec4<f32>(2.0);"), "{src}");
    }

    #[test]
    fn test_missing_context_value() {
        let mut g = NodeGraph::new();
        let key = g.context_value("gain", None);
        let err = build_fragment(&g, key, Dialect::Wgsl).unwrap_err();
        assert!(err.is_scope());
    }
}
