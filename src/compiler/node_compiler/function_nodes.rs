//! Calls into native shader functions.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{FunctionId, NodeId};
use crate::compiler::types::NodeType;

use super::var_nodes::build_lvalue;

/// Compile a call. Non-void results are always bound to a temp so the call runs once;
/// void calls become statements.
///
/// # Example
/// ```wgsl
/// let nodeVar0: f32 = luma(vec3<f32>(1.0, 0.5, 0.25));
/// ```
pub fn compile_function_call(
    b: &mut NodeBuilder,
    id: NodeId,
    function: FunctionId,
    args: &[NodeId],
) -> BuildResult<String> {
    if let Some(code) = b.cached_snippet(id) {
        return Ok(code);
    }
    let record = b.register_function(function)?;
    if record.inputs.len() != args.len() {
        return Err(BuildError::type_resolution(format!(
            "`{}` takes {} arguments, got {}",
            record.name,
            record.inputs.len(),
            args.len()
        )));
    }
    b.use_function(function)?;

    let mut codes = Vec::with_capacity(args.len());
    for (arg, input) in args.iter().zip(&record.inputs) {
        let ty = input.value_type();
        if input.qualifier.is_output() {
            let (lvalue, arg_ty) = build_lvalue(b, *arg)?;
            if arg_ty != ty {
                return Err(BuildError::type_resolution(format!(
                    "argument `{}` of `{}` needs a {ty} variable, got {arg_ty}",
                    input.name, record.name
                )));
            }
            codes.push(b.dialect().address_of(&lvalue));
        } else {
            codes.push(b.build_node(*arg, Some(&ty))?);
        }
    }

    let call = format!("{}({})", record.name, codes.join(", "));
    if record.return_type == NodeType::Void {
        b.add_line(format!("{call};"));
        return Ok(String::new());
    }
    let name = b.declare_temp(&record.return_type, &call)?;
    b.cache_snippet(id, &name);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{build_compute, build_fragment, compute_source, fragment_source};
    use crate::compiler::graph::NodeGraph;
    use crate::compiler::types::Dialect;

    const LUMA: &str = "float luma(vec3 c) { return dot(c, vec3(0.299, 0.587, 0.114)); }";

    #[test]
    fn test_glsl_call_is_bound_once() {
        let mut g = NodeGraph::new();
        let f = g.native_function(LUMA, Dialect::Glsl);
        let c = g.vec3(1.0, 0.5, 0.25);
        let y = g.call(f, &[c]);
        let src = fragment_source(&g, y, Dialect::Glsl);
        assert!(src.contains("float luma(vec3 c) {"), "{src}");
        assert!(src.contains("float nodeVar0 = luma(vec3(1.0, 0.5, 0.25));"), "{src}");
        assert!(src.contains("fragColor = vec4(nodeVar0);"), "{src}");
    }

    #[test]
    fn test_includes_are_declared_first() {
        let mut g = NodeGraph::new();
        let helper = g.native_function("float half_of(float x) { return x * 0.5; }", Dialect::Glsl);
        let outer = g.native_function_with_includes(
            "float quarter(float x) { return half_of(half_of(x)); }",
            Dialect::Glsl,
            &[helper],
        );
        let one = g.float(1.0);
        let q = g.call(outer, &[one]);
        let src = fragment_source(&g, q, Dialect::Glsl);
        let helper_at = src.find("float half_of(float x)").unwrap();
        let outer_at = src.find("float quarter(float x)").unwrap();
        assert!(helper_at < outer_at, "{src}");
    }

    #[test]
    fn test_out_argument_passes_variable() {
        let mut g = NodeGraph::new();
        let f = g.native_function("void fill(out float v) { v = 4.0; }", Dialect::Glsl);
        let zero = g.float(0.0);
        let target = g.to_var(zero, Some("target"));
        let call = g.call(f, &[target]);
        let body = g.stack(&[call], None);
        let src = compute_source(&g, body, Dialect::Glsl);
        assert!(src.contains("float target = 0.0;\n    fill(target);"), "{src}");
    }

    #[test]
    fn test_wgsl_pointer_argument() {
        let mut g = NodeGraph::new();
        let f = g.native_function(
            "fn accumulate(acc: ptr<function, f32>, v: f32) {\n    *acc = *acc + v;\n}",
            Dialect::Wgsl,
        );
        let zero = g.float(0.0);
        let total = g.to_var(zero, Some("total"));
        let two = g.float(2.0);
        let call = g.call(f, &[total, two]);
        let src = compute_source(&g, call, Dialect::Wgsl);
        assert!(src.contains("accumulate(&total, 2.0);"), "{src}");
    }

    #[test]
    fn test_wrong_argument_count() {
        let mut g = NodeGraph::new();
        let f = g.native_function(LUMA, Dialect::Glsl);
        let y = g.call(f, &[]);
        let err = build_fragment(&g, y, Dialect::Glsl).unwrap_err();
        assert!(err.is_type_resolution());
    }

    #[test]
    fn test_wgsl_function_in_glsl_build() {
        let mut g = NodeGraph::new();
        let f = g.native_function("fn twice(x: f32) -> f32 { return x * 2.0; }", Dialect::Wgsl);
        let one = g.float(1.0);
        let y = g.call(f, &[one]);
        let out = g.to_var(y, None);
        let err = build_compute(&g, out, Dialect::Glsl).unwrap_err();
        assert!(err.is_dialect());
    }

    #[test]
    fn test_expression_for_out_argument_fails() {
        let mut g = NodeGraph::new();
        let f = g.native_function("void fill(out float v) { v = 4.0; }", Dialect::Glsl);
        let a = g.float(1.0);
        let b = g.float(2.0);
        let sum = g.add(a, b);
        let call = g.call(f, &[sum]);
        let err = build_compute(&g, call, Dialect::Glsl).unwrap_err();
        assert!(err.is_type_resolution());
    }
}
