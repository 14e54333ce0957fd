use std::sync::Arc;

use node_forge_tsl::compiler::graph::{
    BinaryOp, BuiltinValue, LoopParam, MathMethod, NodeKind, StorageAccess,
};
use node_forge_tsl::compiler::{
    self, BuildError, BuildOptions, BuildRequest, BuildResult, CustomNode, Dialect, NodeFrame,
    NodeGraph, NodeId, NodeType, ProgramCache, ShaderStage, UpdateType,
};
use proptest::prelude::*;

fn options(dialect: Dialect) -> BuildOptions {
    BuildOptions::default().with_dialect(dialect)
}

fn fragment(graph: &NodeGraph, root: NodeId, dialect: Dialect) -> String {
    let state = compiler::build(graph, &BuildRequest::new().fragment(root), &options(dialect))
        .unwrap_or_else(|e| panic!("fragment build failed: {e}"));
    state.fragment_shader().unwrap().to_string()
}

/// `position` attribute extended to clip space.
fn clip_position(g: &mut NodeGraph) -> NodeId {
    let pos = g.attribute("position", None);
    let one = g.float(1.0);
    g.join(&[pos, one])
}

#[test]
fn named_var_is_declared_once_and_reused() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let s = g.sin(time);
    let var = g.to_var(s, Some("s"));
    let twice = g.add(var, var);

    let glsl = fragment(&g, twice, Dialect::Glsl);
    assert_eq!(glsl.matches("float s = sin(time);").count(), 1, "{glsl}");
    assert!(glsl.contains("(s + s)"), "{glsl}");

    let wgsl = fragment(&g, twice, Dialect::Wgsl);
    assert_eq!(wgsl.matches("var s: f32 = sin(objectUniforms.time);").count(), 1, "{wgsl}");
    assert!(wgsl.contains("(s + s)"), "{wgsl}");
}

#[test]
fn nested_loops_get_distinct_counters() {
    let mut g = NodeGraph::new();
    let zero = g.float(0.0);
    let acc = g.to_var(zero, Some("acc"));
    let outer = g.loop_(vec![LoopParam::range(0, 5)], |g, _| {
        g.loop_(vec![LoopParam::range(0, 10)], |g, _| {
            let one = g.float(1.0);
            g.assign_op(acc, BinaryOp::Add, one)
        })
    });
    let body = g.stack(&[acc, outer], None);
    let state = compiler::build(&g, &BuildRequest::new().compute(body), &options(Dialect::Wgsl)).unwrap();
    let src = state.compute_shader().unwrap();
    let outer_at = src.find("for (var i: i32 = 0; i < 5; i++) {").unwrap();
    let inner_at = src.find("for (var j: i32 = 0; j < 10; j++) {").unwrap();
    assert!(outer_at < inner_at, "{src}");
}

#[test]
fn conditional_resolves_branch_type() {
    let mut g = NodeGraph::new();
    let x = g.uniform("x", NodeType::Float);
    let half = g.float(0.5);
    let cond = g.greater_than(x, half);
    let red = g.vec3(1.0, 0.0, 0.0);
    let green = g.vec3(0.0, 1.0, 0.0);
    let pick = g.select(cond, red, green);
    let color = g.convert(pick, NodeType::Vec4);
    let src = fragment(&g, color, Dialect::Glsl);
    assert!(src.contains("(x > 0.5) ? vec3(1.0, 0.0, 0.0) : vec3(0.0, 1.0, 0.0)"), "{src}");

    let one = g.float(1.0);
    let bad = g.select(cond, red, one);
    let err = compiler::build(&g, &BuildRequest::new().fragment(bad), &options(Dialect::Glsl)).unwrap_err();
    assert!(err.is_type_resolution(), "{err}");
    assert_eq!(err.node.as_ref().map(|n| n.id), Some(bad));
}

#[test]
fn stages_only_declare_what_they_use() {
    let mut g = NodeGraph::new();
    let clip = clip_position(&mut g);
    let tint = g.uniform("tint", NodeType::Vec4);
    let state = compiler::build(
        &g,
        &BuildRequest::new().vertex(clip).fragment(tint),
        &options(Dialect::Wgsl),
    )
    .unwrap();
    let vs = state.vertex_shader().unwrap();
    let fs = state.fragment_shader().unwrap();
    assert!(!vs.contains("tint"), "{vs}");
    assert!(fs.contains("return objectUniforms.tint;"), "{fs}");
    assert!(!fs.contains("position: vec3<f32>"), "{fs}");

    let ubo = state.uniform_buffer("object").unwrap();
    assert_eq!(ubo.visibility, vec![ShaderStage::Fragment]);
    assert_eq!(state.node_attributes().len(), 1);
    assert_eq!(state.node_attributes()[0].name, "position");
}

#[test]
fn shared_subexpression_is_bound_per_stage() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let s = g.sin(time);
    let sum = g.add(s, s);
    let clip = clip_position(&mut g);
    let moved = g.add(clip, sum);
    let state = compiler::build(
        &g,
        &BuildRequest::new().vertex(moved).fragment(sum),
        &options(Dialect::Wgsl),
    )
    .unwrap();
    for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
        let src = state.shader(stage).unwrap();
        assert_eq!(
            src.matches("let nodeVar0: f32 = sin(objectUniforms.time);").count(),
            1,
            "{stage}: {src}"
        );
    }
}

#[test]
fn cloned_graph_builds_independently() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let s = g.sin(time);
    let mut copy = g.clone();
    assert_ne!(g.uid(), copy.uid());

    copy.replace(s, NodeKind::Math {
        method: MathMethod::Cos,
        args: vec![time],
    });
    let original = fragment(&g, s, Dialect::Wgsl);
    let changed = fragment(&copy, s, Dialect::Wgsl);
    assert!(original.contains("sin(objectUniforms.time)"), "{original}");
    assert!(changed.contains("cos(objectUniforms.time)"), "{changed}");
}

#[test]
fn concurrent_builds_of_one_graph_agree() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let s = g.sin(time);
    let var = g.to_var(s, Some("wave"));
    let sq = g.mul(var, var);
    let request = BuildRequest::new().fragment(sq);
    let expected = fragment(&g, sq, Dialect::Glsl);

    let outputs: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    compiler::build(&g, &request, &options(Dialect::Glsl))
                        .unwrap()
                        .fragment_shader()
                        .unwrap()
                        .to_string()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for out in outputs {
        assert_eq!(out, expected);
    }
}

#[derive(Debug)]
struct Pulse;

impl CustomNode for Pulse {
    fn type_name(&self) -> &str {
        "Pulse"
    }

    fn setup(&self, graph: &mut NodeGraph) -> BuildResult<NodeId> {
        let time = graph.uniform("time", NodeType::Float);
        let fast = graph.float(4.0);
        let scaled = graph.mul(time, fast);
        Ok(graph.sin(scaled))
    }

    fn update_type(&self) -> UpdateType {
        UpdateType::Frame
    }
}

#[derive(Debug)]
struct Endless;

impl CustomNode for Endless {
    fn type_name(&self) -> &str {
        "Endless"
    }

    fn setup(&self, graph: &mut NodeGraph) -> BuildResult<NodeId> {
        Ok(graph.custom(Arc::new(Endless)))
    }
}

#[test]
fn custom_node_expands_and_records_cadence() {
    let mut g = NodeGraph::new();
    let pulse = g.custom(Arc::new(Pulse));
    let state = compiler::build(&g, &BuildRequest::new().fragment(pulse), &options(Dialect::Wgsl)).unwrap();
    let src = state.fragment_shader().unwrap();
    assert!(src.contains("sin((objectUniforms.time * 4.0))"), "{src}");
    assert!(g.get(pulse).is_some_and(|k| matches!(k, NodeKind::Custom(_))));
    assert_eq!(g.len(), 1);

    let updates = state.update_nodes();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].label, "Pulse");
    let mut frame = NodeFrame::new();
    frame.next_frame(0.0);
    assert_eq!(frame.due(updates).len(), 1);
    assert!(frame.due(updates).is_empty());
}

#[test]
fn runaway_expansion_is_a_graph_error() {
    let mut g = NodeGraph::new();
    let node = g.custom(Arc::new(Endless));
    let mut opts = options(Dialect::Wgsl);
    opts.max_setup_depth = 8;
    let err = compiler::build(&g, &BuildRequest::new().fragment(node), &opts).unwrap_err();
    assert!(err.is_graph(), "{err}");
}

#[test]
fn error_names_stage_and_node() {
    let mut g = NodeGraph::new();
    let uv = g.attribute("uv", None);
    let color = g.convert(uv, NodeType::Vec4);
    let err: BuildError = compiler::build(&g, &BuildRequest::new().fragment(color), &options(Dialect::Glsl))
        .unwrap_err();
    assert!(err.is_scope());
    assert_eq!(err.stage, Some(ShaderStage::Fragment));
    let text = err.to_string();
    assert!(text.contains("Attribute"), "{text}");
}

#[test]
fn program_cache_rebuilds_after_edit() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let s = g.sin(time);
    let request = BuildRequest::new().fragment(s);
    let opts = options(Dialect::Glsl);
    let mut cache = ProgramCache::new();
    let first = cache.get_or_build(&g, &request, &opts).unwrap();
    let again = cache.get_or_build(&g, &request, &opts).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let two = g.float(2.0);
    g.replace(s, NodeKind::Operator {
        op: BinaryOp::Mul,
        left: time,
        right: two,
    });
    let rebuilt = cache.get_or_build(&g, &request, &opts).unwrap();
    assert!(rebuilt.fragment_shader().unwrap().contains("(time * 2.0)"));
    assert_eq!(cache.stats(), (1, 2));
}

#[test]
fn wgsl_output_passes_naga_validation() {
    let mut g = NodeGraph::new();
    let clip = clip_position(&mut g);
    let uv = g.attribute("uv", None);
    let v_uv = g.varying(uv, Some("uv"));
    let time = g.uniform("time", NodeType::Float);
    let wave = g.sin(time);
    let zero = g.float(0.0);
    let one = g.float(1.0);
    let lit = g.math(MathMethod::Max, &[wave, zero]);
    let color = g.join(&[v_uv, lit, one]);
    let opts = options(Dialect::Wgsl).with_validation(true);
    compiler::build(&g, &BuildRequest::new().vertex(clip).fragment(color), &opts)
        .unwrap_or_else(|e| panic!("{e}"));

    let mut c = NodeGraph::new();
    let id = c.builtin(BuiltinValue::GlobalInvocationId);
    let x = c.split(id, "x");
    let input = c.storage_buffer("positions", NodeType::Vec4, None, StorageAccess::Read);
    let output = c.storage_buffer("velocities", NodeType::Vec4, None, StorageAccess::ReadWrite);
    let read = c.index(input, x);
    let write = c.index(output, x);
    let store = c.assign(write, read);
    let zero = c.int(0);
    let acc = c.to_var(zero, Some("acc"));
    let lp = c.loop_(vec![LoopParam::count(4)], |c, idx| c.assign_op(acc, BinaryOp::Add, idx[0]));
    let body = c.stack(&[store, acc, lp], None);
    compiler::build(&c, &BuildRequest::new().compute(body), &opts).unwrap_or_else(|e| panic!("{e}"));
}

#[test]
fn glsl_output_passes_naga_validation() {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let tint = g.uniform("tint", NodeType::Vec3);
    let wave = g.sin(time);
    let shade = g.mul(tint, wave);
    let one = g.float(1.0);
    let color = g.join(&[shade, one]);
    let opts = options(Dialect::Glsl).with_validation(true);
    compiler::build(&g, &BuildRequest::new().fragment(color), &opts).unwrap_or_else(|e| panic!("{e}"));
}

fn chain(ops: &[u8]) -> (NodeGraph, NodeId) {
    let mut g = NodeGraph::new();
    let time = g.uniform("time", NodeType::Float);
    let mut current = time;
    for (i, op) in ops.iter().enumerate() {
        let k = g.float(i as f64 + 1.0);
        current = match op % 5 {
            0 => g.add(current, k),
            1 => g.mul(current, time),
            2 => g.sin(current),
            3 => g.to_var(current, None),
            _ => g.add(current, current),
        };
    }
    (g, current)
}

proptest! {
    #[test]
    fn builds_are_deterministic(ops in proptest::collection::vec(0u8..5, 1..10)) {
        let (g, root) = chain(&ops);
        let a = fragment(&g, root, Dialect::Wgsl);
        let b = fragment(&g, root, Dialect::Wgsl);
        prop_assert_eq!(&a, &b);
        let copy = g.clone();
        let c = fragment(&copy, root, Dialect::Wgsl);
        prop_assert_eq!(a, c);
    }
}
