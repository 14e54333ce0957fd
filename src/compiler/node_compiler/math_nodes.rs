//! Compilers for operators, math methods, swizzles, joins, conversions and the `Remap`
//! setup expansion.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{BinaryOp, MathMethod, NodeGraph, NodeId, UnaryOp};
use crate::compiler::types::{NodeType, ScalarKind, ShaderStage};

/// Common scalar kind of two numeric operands: float absorbs integers, int and uint never mix.
fn promote(a: ScalarKind, b: ScalarKind) -> Option<ScalarKind> {
    match (a, b) {
        (a, b) if a == b => Some(a),
        (ScalarKind::Float, ScalarKind::Int | ScalarKind::Uint)
        | (ScalarKind::Int | ScalarKind::Uint, ScalarKind::Float) => Some(ScalarKind::Float),
        _ => None,
    }
}

/// Component-wise shape of two scalar/vector operands (scalars broadcast).
fn broadcast(a: &NodeType, b: &NodeType, kind: ScalarKind) -> Option<NodeType> {
    let n = match (a.components(), b.components()) {
        (1, m) | (m, 1) => m,
        (n, m) if n == m => n,
        _ => return None,
    };
    NodeType::vector(kind, n)
}

fn is_integer(kind: ScalarKind) -> bool {
    matches!(kind, ScalarKind::Int | ScalarKind::Uint)
}

/// Result type of `a op b`.
pub fn operator_type(op: BinaryOp, a: &NodeType, b: &NodeType) -> BuildResult<NodeType> {
    let err = |why: &str| {
        BuildError::type_resolution(format!(
            "cannot apply `{}` to {a} and {b}: {why}",
            op.symbol()
        ))
    };
    let (Some(ka), Some(kb)) = (a.scalar_kind(), b.scalar_kind()) else {
        return Err(err("operands must be scalars, vectors or matrices"));
    };

    if op.is_logical() {
        return if *a == NodeType::Bool && *b == NodeType::Bool {
            Ok(NodeType::Bool)
        } else {
            Err(err("logical operators take bool scalars"))
        };
    }

    if op.is_comparison() {
        if !a.is_scalar() || !b.is_scalar() {
            return Err(err("comparisons take scalars"));
        }
        match (ka, kb) {
            (ScalarKind::Bool, ScalarKind::Bool) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {}
            (ScalarKind::Bool, _) | (_, ScalarKind::Bool) => {
                return Err(err("bools only compare for equality with bools"));
            }
            _ => {
                promote(ka, kb).ok_or_else(|| err("int and uint do not mix"))?;
            }
        }
        return Ok(NodeType::Bool);
    }

    if op.is_bitwise() {
        if a.is_matrix() || b.is_matrix() || !is_integer(ka) || !is_integer(kb) {
            return Err(err("bitwise operators take int or uint operands"));
        }
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            return if b.is_scalar() || b.components() == a.components() {
                Ok(a.clone())
            } else {
                Err(err("shift amount must match the shifted value"))
            };
        }
        if ka != kb {
            return Err(err("int and uint do not mix"));
        }
        return broadcast(a, b, ka).ok_or_else(|| err("component counts differ"));
    }

    if ka == ScalarKind::Bool || kb == ScalarKind::Bool {
        return Err(err("arithmetic needs numeric operands"));
    }
    let kind = promote(ka, kb).ok_or_else(|| err("int and uint do not mix"))?;
    match (a.matrix_columns(), b.matrix_columns()) {
        (Some(n), Some(m)) => {
            if n == m && matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
                Ok(a.clone())
            } else {
                Err(err("matrix operands must match"))
            }
        }
        (Some(n), None) | (None, Some(n)) => {
            let other = if a.is_matrix() { b } else { a };
            let matrix = if a.is_matrix() { a } else { b };
            if op != BinaryOp::Mul {
                Err(err("matrices only combine with non-matrices through `*`"))
            } else if other.is_scalar() {
                Ok(matrix.clone())
            } else if other.components() == n {
                NodeType::vector(ScalarKind::Float, n).ok_or_else(|| err("bad matrix size"))
            } else {
                Err(err("vector length must match the matrix size"))
            }
        }
        (None, None) => broadcast(a, b, kind).ok_or_else(|| err("component counts differ")),
    }
}

/// Types each operand is coerced to before emitting `a op b`.
fn operand_targets(op: BinaryOp, a: &NodeType, b: &NodeType, result: &NodeType) -> (NodeType, NodeType) {
    let recast = |t: &NodeType, kind: ScalarKind| t.with_scalar_kind(kind).unwrap_or_else(|| t.clone());
    if op.is_logical() {
        return (a.clone(), b.clone());
    }
    if op.is_comparison() {
        return match (a.scalar_kind(), b.scalar_kind()) {
            (Some(ka), Some(kb)) => match promote(ka, kb) {
                Some(kind) => (recast(a, kind), recast(b, kind)),
                None => (a.clone(), b.clone()),
            },
            _ => (a.clone(), b.clone()),
        };
    }
    if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
        return (a.clone(), recast(b, ScalarKind::Uint));
    }
    if a.is_matrix() || b.is_matrix() {
        return (recast(a, ScalarKind::Float), recast(b, ScalarKind::Float));
    }
    match result.scalar_kind() {
        Some(kind) => (recast(a, kind), recast(b, kind)),
        None => (a.clone(), b.clone()),
    }
}

/// Compile a binary operator. Operators are always parenthesized.
///
/// # Example
/// ```wgsl
/// (objectUniforms.tint * f32(count))
/// ```
pub fn compile_operator(
    b: &mut NodeBuilder,
    op: BinaryOp,
    left: NodeId,
    right: NodeId,
) -> BuildResult<String> {
    let (lt, rt) = (b.node_type(left)?, b.node_type(right)?);
    let result = operator_type(op, &lt, &rt)?;
    let (l_target, r_target) = operand_targets(op, &lt, &rt, &result);
    let l = b.build_node(left, Some(&l_target))?;
    let r = b.build_node(right, Some(&r_target))?;
    if op == BinaryOp::Rem && result.scalar_kind() == Some(ScalarKind::Float) {
        return Ok(b.dialect().float_remainder(&l, &r));
    }
    Ok(format!("({l} {} {r})", op.symbol()))
}

pub fn unary_type(op: UnaryOp, ty: &NodeType) -> BuildResult<NodeType> {
    let kind = ty.scalar_kind();
    let ok = match op {
        UnaryOp::Neg => matches!(kind, Some(ScalarKind::Float | ScalarKind::Int)),
        UnaryOp::Not => *ty == NodeType::Bool,
        UnaryOp::BitNot => !ty.is_matrix() && kind.is_some_and(is_integer),
    };
    if ok {
        Ok(ty.clone())
    } else {
        Err(BuildError::type_resolution(format!("cannot apply {op:?} to {ty}")))
    }
}

pub fn compile_unary(b: &mut NodeBuilder, op: UnaryOp, node: NodeId) -> BuildResult<String> {
    let ty = b.node_type(node)?;
    unary_type(op, &ty)?;
    let code = b.build_node(node, None)?;
    let symbol = match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
    };
    // `--x` lexes as a decrement in both dialects.
    if code.starts_with(symbol) {
        Ok(format!("({symbol}({code}))"))
    } else {
        Ok(format!("({symbol}{code})"))
    }
}

/// Widest scalar/vector among `types`; scalars broadcast, vectors must agree.
fn widest(method: MathMethod, types: &[NodeType], force_float: bool) -> BuildResult<NodeType> {
    let n = types.iter().map(NodeType::components).max().unwrap_or(1);
    if types.iter().any(|t| !t.is_scalar() && t.components() != n) {
        return Err(BuildError::type_resolution(format!(
            "`{method:?}` arguments have mismatched lengths"
        )));
    }
    let kinds: Vec<ScalarKind> = types.iter().filter_map(NodeType::scalar_kind).collect();
    let kind = if force_float || kinds.contains(&ScalarKind::Float) {
        ScalarKind::Float
    } else if kinds.windows(2).all(|w| w[0] == w[1]) {
        kinds.first().copied().unwrap_or(ScalarKind::Float)
    } else {
        return Err(BuildError::type_resolution(format!(
            "`{method:?}` cannot mix int and uint arguments"
        )));
    };
    NodeType::vector(kind, n).ok_or_else(|| {
        BuildError::type_resolution(format!("`{method:?}` has no {n}-component form"))
    })
}

fn float_of(ty: &NodeType) -> BuildResult<NodeType> {
    ty.with_scalar_kind(ScalarKind::Float)
        .ok_or_else(|| BuildError::type_resolution(format!("{ty} has no float form")))
}

/// Result type of a math method call.
pub fn math_type(method: MathMethod, args: &[NodeType]) -> BuildResult<NodeType> {
    if args.len() != method.arity() {
        return Err(BuildError::type_resolution(format!(
            "`{method:?}` takes {} arguments, got {}",
            method.arity(),
            args.len()
        )));
    }
    for ty in args {
        if !ty.is_numeric_vector_or_scalar() || ty.scalar_kind() == Some(ScalarKind::Bool) {
            return Err(BuildError::type_resolution(format!(
                "`{method:?}` takes numeric scalars or vectors, got {ty}"
            )));
        }
    }
    use MathMethod::*;
    match method {
        Length => Ok(NodeType::Float),
        Distance => widest(method, args, true).map(|_| NodeType::Float),
        Dot => {
            if args[0].is_scalar() || args[0].components() != args[1].components() {
                return Err(BuildError::type_resolution(
                    "`Dot` takes two vectors of the same length",
                ));
            }
            Ok(NodeType::Float)
        }
        Cross => {
            if args.iter().any(|t| t.components() != 3) {
                return Err(BuildError::type_resolution("`Cross` takes two 3-component vectors"));
            }
            Ok(NodeType::Vec3)
        }
        Reflect => {
            if args.iter().any(NodeType::is_scalar) {
                return Err(BuildError::type_resolution("`Reflect` takes vectors"));
            }
            widest(method, args, true)
        }
        Abs | Sign => {
            if args[0].scalar_kind() == Some(ScalarKind::Uint) && method == Sign {
                return Err(BuildError::type_resolution("`Sign` is undefined for uint"));
            }
            Ok(args[0].clone())
        }
        Min | Max | Clamp => widest(method, args, false),
        Pow | Step | Atan2 | Mix | Smoothstep => widest(method, args, true),
        _ => float_of(&args[0]),
    }
}

/// Compile a math method call.
///
/// Screen-space derivatives only exist in the fragment stage.
pub fn compile_math(
    b: &mut NodeBuilder,
    id: NodeId,
    method: MathMethod,
    args: &[NodeId],
) -> BuildResult<String> {
    if matches!(method, MathMethod::Dfdx | MathMethod::Dfdy) && b.stage() != ShaderStage::Fragment
    {
        return Err(BuildError::scope(format!(
            "`{method:?}` is only available in the fragment stage"
        )));
    }
    let result = b.node_type(id)?;
    let types = args
        .iter()
        .map(|a| b.node_type(*a))
        .collect::<BuildResult<Vec<_>>>()?;
    let targets: Vec<NodeType> = match method {
        MathMethod::Length | MathMethod::Normalize => vec![float_of(&types[0])?],
        MathMethod::Dot | MathMethod::Distance | MathMethod::Reflect => {
            let shared = widest(method, &types, true)?;
            vec![shared.clone(), shared]
        }
        MathMethod::Cross => vec![NodeType::Vec3, NodeType::Vec3],
        _ => vec![result; args.len()],
    };
    let mut codes = Vec::with_capacity(args.len());
    for (arg, target) in args.iter().zip(&targets) {
        codes.push(b.build_node(*arg, Some(target))?);
    }
    Ok(b.dialect().math_call(method, &codes))
}

fn swizzle_index(c: char) -> Option<u32> {
    match c {
        'x' | 'r' | 's' => Some(0),
        'y' | 'g' | 't' => Some(1),
        'z' | 'b' | 'p' => Some(2),
        'w' | 'a' | 'q' => Some(3),
        _ => None,
    }
}

/// Swizzle normalized to `xyzw` letters, checked against a source of `len` components.
pub fn normalize_swizzle(components: &str, len: u32) -> BuildResult<String> {
    if components.is_empty() || components.len() > 4 {
        return Err(BuildError::type_resolution(format!(
            "swizzle `{components}` must have 1 to 4 components"
        )));
    }
    components
        .chars()
        .map(|c| {
            let idx = swizzle_index(c).ok_or_else(|| {
                BuildError::type_resolution(format!("`{c}` is not a swizzle component"))
            })?;
            if idx >= len {
                return Err(BuildError::type_resolution(format!(
                    "component `{c}` is out of range for a {len}-component value"
                )));
            }
            Ok(['x', 'y', 'z', 'w'][idx as usize])
        })
        .collect()
}

pub fn split_type(source: &NodeType, components: &str) -> BuildResult<NodeType> {
    let Some(kind) = source.scalar_kind().filter(|_| source.is_vector()) else {
        return Err(BuildError::type_resolution(format!("cannot swizzle {source}")));
    };
    let swizzle = normalize_swizzle(components, source.components())?;
    NodeType::vector(kind, swizzle.len() as u32)
        .ok_or_else(|| BuildError::type_resolution(format!("bad swizzle `{components}`")))
}

pub fn compile_split(b: &mut NodeBuilder, node: NodeId, components: &str) -> BuildResult<String> {
    let ty = b.node_type(node)?;
    split_type(&ty, components)?;
    let swizzle = normalize_swizzle(components, ty.components())?;
    let base = b.build_node(node, None)?;
    Ok(format!("{base}.{swizzle}"))
}

pub fn join_type(parts: &[NodeType], explicit: Option<&NodeType>) -> BuildResult<NodeType> {
    if parts.iter().any(|t| !t.is_numeric_vector_or_scalar()) {
        return Err(BuildError::type_resolution(
            "join parts must be scalars or vectors",
        ));
    }
    let total: u32 = parts.iter().map(NodeType::components).sum();
    if let Some(ty) = explicit {
        if !ty.is_vector() || ty.components() != total {
            return Err(BuildError::type_resolution(format!(
                "cannot join {total} components into {ty}"
            )));
        }
        return Ok(ty.clone());
    }
    let kinds: Vec<ScalarKind> = parts.iter().filter_map(NodeType::scalar_kind).collect();
    let kind = if kinds.windows(2).all(|w| w[0] == w[1]) {
        kinds.first().copied().unwrap_or(ScalarKind::Float)
    } else if kinds.contains(&ScalarKind::Bool) {
        return Err(BuildError::type_resolution("cannot join bools with numbers"));
    } else {
        ScalarKind::Float
    };
    if !(2..=4).contains(&total) {
        return Err(BuildError::type_resolution(format!(
            "join needs 2 to 4 components, got {total}"
        )));
    }
    NodeType::vector(kind, total)
        .ok_or_else(|| BuildError::type_resolution(format!("cannot join {total} components")))
}

/// Compile a join into a vector constructor.
///
/// # Example
/// ```glsl
/// vec4(position, 1.0)
/// ```
pub fn compile_join(b: &mut NodeBuilder, id: NodeId, nodes: &[NodeId]) -> BuildResult<String> {
    let ty = b.node_type(id)?;
    let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
    let mut parts = Vec::with_capacity(nodes.len());
    for node in nodes {
        let part_ty = b.node_type(*node)?;
        let target = part_ty.with_scalar_kind(kind).unwrap_or(part_ty);
        parts.push(b.build_node(*node, Some(&target))?);
    }
    let name = b.type_name(&ty)?;
    Ok(b.dialect().constructor(&name, &parts))
}

pub fn compile_convert(b: &mut NodeBuilder, node: NodeId, to: &NodeType) -> BuildResult<String> {
    let from = b.node_type(node)?;
    let code = b.build_node(node, None)?;
    b.convert(&code, &from, to)
}

/// Expand `Remap` into `(x - inLow) / (inHigh - inLow) * (outHigh - outLow) + outLow`.
pub fn setup_remap(
    graph: &mut NodeGraph,
    node: NodeId,
    in_low: NodeId,
    in_high: NodeId,
    out_low: NodeId,
    out_high: NodeId,
) -> NodeId {
    let offset = graph.sub(node, in_low);
    let in_range = graph.sub(in_high, in_low);
    let t = graph.div(offset, in_range);
    let out_range = graph.sub(out_high, out_low);
    let scaled = graph.mul(t, out_range);
    graph.add(scaled, out_low)
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{build_compute, build_fragment, fragment_source};
    use super::*;
    use crate::compiler::builder::{BuildOptions, BuildRequest};
    use crate::compiler::types::Dialect;

    #[test]
    fn test_operator_type_rules() {
        use NodeType::*;
        assert_eq!(operator_type(BinaryOp::Mul, &Vec3, &Float).unwrap(), Vec3);
        assert_eq!(operator_type(BinaryOp::Add, &Int, &Float).unwrap(), Float);
        assert_eq!(operator_type(BinaryOp::Mul, &Mat4, &Vec4).unwrap(), Vec4);
        assert_eq!(operator_type(BinaryOp::Lt, &Int, &Float).unwrap(), Bool);
        assert!(operator_type(BinaryOp::Add, &Int, &Uint).is_err());
        assert!(operator_type(BinaryOp::Add, &Vec3, &Vec2).is_err());
        assert!(operator_type(BinaryOp::Lt, &Vec2, &Vec2).is_err());
        assert!(operator_type(BinaryOp::And, &Bool, &Float).is_err());
        assert!(operator_type(BinaryOp::BitAnd, &Float, &Float).is_err());
        assert!(operator_type(BinaryOp::Div, &Mat3, &Float).is_err());
    }

    #[test]
    fn test_math_type_rules() {
        use NodeType::*;
        assert_eq!(math_type(MathMethod::Length, &[Vec3]).unwrap(), Float);
        assert_eq!(math_type(MathMethod::Mix, &[Vec3, Vec3, Float]).unwrap(), Vec3);
        assert_eq!(math_type(MathMethod::Clamp, &[Int, Int, Int]).unwrap(), Int);
        assert_eq!(math_type(MathMethod::Sin, &[Int]).unwrap(), Float);
        assert!(math_type(MathMethod::Pow, &[Float]).is_err());
        assert!(math_type(MathMethod::Cross, &[Vec2, Vec2]).is_err());
    }

    #[test]
    fn test_swizzle_normalization() {
        assert_eq!(normalize_swizzle("rgb", 4).unwrap(), "xyz");
        assert_eq!(normalize_swizzle("st", 2).unwrap(), "xy");
        assert!(normalize_swizzle("z", 2).is_err());
        assert!(normalize_swizzle("xyzwx", 4).is_err());
    }

    #[test]
    fn test_shared_subexpression_becomes_temp() {
        let mut g = NodeGraph::new();
        let time = g.uniform("time", NodeType::Float);
        let s = g.sin(time);
        let sum = g.add(s, s);
        let src = fragment_source(&g, sum, Dialect::Wgsl);
        assert!(src.contains("let nodeVar0: f32 = sin(objectUniforms.time);"), "{src}");
        assert!(src.contains("return vec4<f32>((nodeVar0 + nodeVar0));"), "{src}");
    }

    #[test]
    fn test_negated_negative_literal_validates() {
        for dialect in [Dialect::Wgsl, Dialect::Glsl] {
            let mut g = NodeGraph::new();
            let x = g.float(-1.0);
            let neg = g.negate(x);
            let options = BuildOptions::default().with_dialect(dialect).with_validation(true);
            let state = NodeBuilder::new(&g, options)
                .build(&BuildRequest::new().fragment(neg))
                .unwrap_or_else(|e| panic!("{dialect:?}: {e}"));
            let src = state.fragment_shader().unwrap();
            assert!(src.contains("(-(-1.0))"), "{src}");
        }
    }

    #[test]
    fn test_negated_uniform_stays_compact() {
        let mut g = NodeGraph::new();
        let t = g.uniform("time", NodeType::Float);
        let neg = g.negate(t);
        let src = fragment_source(&g, neg, Dialect::Glsl);
        assert!(src.contains("fragColor = vec4((-time));"), "{src}");
    }

    #[test]
    fn test_float_remainder_uses_mod_in_glsl() {
        let mut g = NodeGraph::new();
        let t = g.uniform("time", NodeType::Float);
        let one = g.float(1.0);
        let r = g.op(BinaryOp::Rem, t, one);
        let src = fragment_source(&g, r, Dialect::Glsl);
        assert!(src.contains("fragColor = vec4(mod(time, 1.0));"), "{src}");
    }

    #[test]
    fn test_int_operand_is_cast_to_float() {
        let mut g = NodeGraph::new();
        let count = g.uniform("count", NodeType::Int);
        let half = g.float(0.5);
        let product = g.mul(count, half);
        let src = fragment_source(&g, product, Dialect::Wgsl);
        assert!(src.contains("(f32(objectUniforms.count) * 0.5)"), "{src}");
    }

    #[test]
    fn test_mixed_int_uint_fails() {
        let mut g = NodeGraph::new();
        let a = g.int(1);
        let b = g.uint(2);
        let sum = g.add(a, b);
        let err = build_fragment(&g, sum, Dialect::Wgsl).unwrap_err();
        assert!(err.is_type_resolution());
        assert_eq!(err.node.as_ref().map(|n| n.kind), Some("Operator"));
    }

    #[test]
    fn test_derivatives_need_fragment_stage() {
        let mut g = NodeGraph::new();
        let x = g.float(1.0);
        let d = g.math(MathMethod::Dfdx, &[x]);
        let v = g.to_var(d, Some("slope"));
        let err = build_compute(&g, v, Dialect::Wgsl).unwrap_err();
        assert!(err.is_scope());
    }

    #[test]
    fn test_remap_expands_to_arithmetic() {
        let mut g = NodeGraph::new();
        let x = g.uniform("x", NodeType::Float);
        let (a, b, c, d) = (g.float(0.0), g.float(1.0), g.float(-1.0), g.float(1.0));
        let r = g.remap(x, a, b, c, d);
        let src = fragment_source(&g, r, Dialect::Glsl);
        assert!(
            src.contains("((((x - 0.0) / (1.0 - 0.0)) * (1.0 - -1.0)) + -1.0)"),
            "{src}"
        );
    }

    #[test]
    fn test_convert_truncates_and_pads() {
        let mut g = NodeGraph::new();
        let c = g.vec3(1.0, 2.0, 3.0);
        let xy = g.convert(c, NodeType::Vec2);
        let back = g.convert(xy, NodeType::Vec4);
        let src = fragment_source(&g, back, Dialect::Glsl);
        assert!(src.contains("vec4(vec3(1.0, 2.0, 3.0).xy, 0.0, 1.0)"), "{src}");
    }
}
