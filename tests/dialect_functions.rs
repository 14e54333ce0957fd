use node_forge_tsl::compiler::{
    self, BuildOptions, BuildRequest, Dialect, NodeGraph, NodeType, ShaderStage,
};

const LUMA: &str = "float luma(vec3 c) { return dot(c, vec3(0.299, 0.587, 0.114)); }";

fn clip_position(g: &mut NodeGraph) -> compiler::NodeId {
    let pos = g.attribute("position", None);
    let one = g.float(1.0);
    g.join(&[pos, one])
}

#[test]
fn glsl_function_lowers_into_wgsl_build() {
    let mut g = NodeGraph::new();
    let luma = g.native_function(LUMA, Dialect::Glsl);
    let tint = g.uniform("tint", NodeType::Vec3);
    let y = g.call(luma, &[tint]);
    let opts = BuildOptions::default().with_validation(true);
    let state = compiler::build(&g, &BuildRequest::new().fragment(y), &opts)
        .unwrap_or_else(|e| panic!("{e}"));
    let src = state.fragment_shader().unwrap();
    assert!(src.contains("fn luma"), "{src}");
    assert!(src.contains("-> f32"), "{src}");
    assert!(src.contains(": f32 = luma"), "{src}");
    assert!(!src.contains("float luma"), "{src}");
}

#[test]
fn glsl_out_parameter_cannot_lower_to_wgsl() {
    let mut g = NodeGraph::new();
    let f = g.native_function("void fill(out float v) { v = 4.0; }", Dialect::Glsl);
    let zero = g.float(0.0);
    let target = g.to_var(zero, Some("target"));
    let call = g.call(f, &[target]);
    let body = g.stack(&[call], Some(target));
    let err = compiler::build(&g, &BuildRequest::new().fragment(body), &BuildOptions::default())
        .unwrap_err();
    assert!(err.is_dialect(), "{err}");
}

#[test]
fn colliding_function_names_are_suffixed() {
    let mut g = NodeGraph::new();
    let double = g.native_function("float helper(float x) { return x * 2.0; }", Dialect::Glsl);
    let triple = g.native_function("float helper(float x) { return x * 3.0; }", Dialect::Glsl);
    let one = g.float(1.0);
    let a = g.call(double, &[one]);
    let b = g.call(triple, &[one]);
    let sum = g.add(a, b);
    let state = compiler::build(
        &g,
        &BuildRequest::new().fragment(sum),
        &BuildOptions::default().with_dialect(Dialect::Glsl),
    )
    .unwrap();
    let src = state.fragment_shader().unwrap();
    assert!(src.contains("float helper(float x) { return x * 2.0; }"), "{src}");
    assert!(src.contains("float helper_1(float x) { return x * 3.0; }"), "{src}");
    assert!(src.contains("helper_1(1.0)"), "{src}");
    let names: Vec<&str> = state.codes().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"helper") && names.contains(&"helper_1"));
}

#[test]
fn function_is_emitted_in_every_stage_that_calls_it() {
    let mut g = NodeGraph::new();
    let wobble = g.native_function(
        "fn wobble(x: f32) -> f32 {\n    return x * 0.5;\n}",
        Dialect::Wgsl,
    );
    let time = g.uniform("time", NodeType::Float);
    let w = g.call(wobble, &[time]);
    let clip = clip_position(&mut g);
    let moved = g.add(clip, w);
    let state = compiler::build(
        &g,
        &BuildRequest::new().vertex(moved).fragment(w),
        &BuildOptions::default().with_validation(true),
    )
    .unwrap_or_else(|e| panic!("{e}"));
    for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
        let src = state.shader(stage).unwrap();
        assert_eq!(src.matches("fn wobble(x: f32) -> f32 {").count(), 1, "{stage}: {src}");
    }
    let code = &state.codes()[0];
    assert_eq!(code.name, "wobble");
    assert_eq!(code.stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
}

#[test]
fn function_used_only_in_fragment_stays_out_of_vertex() {
    let mut g = NodeGraph::new();
    let luma = g.native_function(LUMA, Dialect::Glsl);
    let grey = g.vec3(0.5, 0.5, 0.5);
    let y = g.call(luma, &[grey]);
    let clip = clip_position(&mut g);
    let state = compiler::build(
        &g,
        &BuildRequest::new().vertex(clip).fragment(y),
        &BuildOptions::default().with_dialect(Dialect::Glsl),
    )
    .unwrap();
    assert!(!state.vertex_shader().unwrap().contains("luma"));
    assert!(state.fragment_shader().unwrap().contains("float luma(vec3 c)"));
    assert_eq!(state.codes()[0].stages, vec![ShaderStage::Fragment]);
}
