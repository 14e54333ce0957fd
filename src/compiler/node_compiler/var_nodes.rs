//! Compilers for variables and assignments.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::dialect::VarKind;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{BinaryOp, NodeId, NodeKind, StorageAccess};
use crate::compiler::types::{NodeType, ScalarKind};

use super::math_nodes::{normalize_swizzle, operator_type};
use super::struct_nodes::index_expression;

pub fn var_type(b: &mut NodeBuilder, node: NodeId) -> BuildResult<NodeType> {
    let ty = b.node_type(node)?;
    if ty == NodeType::Void {
        return Err(BuildError::type_resolution("cannot store a node that produces no value"));
    }
    Ok(ty)
}

/// Declare a named local initialized from `node`.
///
/// # Example
/// ```glsl
/// float s = sin(time);
/// ```
pub fn compile_var(
    b: &mut NodeBuilder,
    id: NodeId,
    node: NodeId,
    name: Option<&str>,
    read_only: bool,
) -> BuildResult<String> {
    if let Some(code) = b.cached_snippet(id) {
        return Ok(code);
    }
    let ty = b.node_type(id)?;
    let init = b.build_node(node, Some(&ty))?;
    let type_name = b.type_name(&ty)?;
    let var_name = match name {
        Some(name) => b.claim_local(name),
        None => b.claim_temp(),
    };
    let kind = if !read_only {
        VarKind::Mutable
    } else if matches!(b.kind(b.resolve(node)?)?, NodeKind::Const { .. }) {
        VarKind::Constant
    } else {
        VarKind::Immutable
    };
    let line = b.dialect().var_decl(&var_name, &type_name, Some(&init), kind);
    b.add_line(line);
    b.cache_variable(id, &var_name);
    Ok(var_name)
}

/// Emit `target = value;` (or `target op= value;`).
pub fn compile_assign(
    b: &mut NodeBuilder,
    target: NodeId,
    value: NodeId,
    op: Option<BinaryOp>,
) -> BuildResult<String> {
    let (lvalue, ty) = build_lvalue(b, target)?;
    let line = match op {
        None => {
            let rhs = b.build_node(value, Some(&ty))?;
            format!("{lvalue} = {rhs};")
        }
        Some(op) => {
            let value_ty = b.node_type(value)?;
            let result = operator_type(op, &ty, &value_ty)?;
            if result != ty {
                return Err(BuildError::type_resolution(format!(
                    "`{}=` would change {ty} into {result}",
                    op.symbol()
                )));
            }
            let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
            let target_ty = match op {
                BinaryOp::Shl | BinaryOp::Shr => value_ty.with_scalar_kind(ScalarKind::Uint),
                _ if ty.is_matrix() || value_ty.is_matrix() => Some(value_ty.clone()),
                _ => value_ty.with_scalar_kind(kind),
            }
            .unwrap_or(value_ty);
            let rhs = b.build_node(value, Some(&target_ty))?;
            if op == BinaryOp::Rem && kind == ScalarKind::Float {
                let rem = b.dialect().float_remainder(&lvalue, &rhs);
                format!("{lvalue} = {rem};")
            } else {
                format!("{lvalue} {}= {rhs};", op.symbol())
            }
        }
    };
    b.add_line(line);
    Ok(String::new())
}

/// Spelling and type of an assignable expression.
///
/// Only variables, properties, and members, elements or swizzles of those are assignable.
pub fn build_lvalue(b: &mut NodeBuilder, id: NodeId) -> BuildResult<(String, NodeType)> {
    let id = b.resolve(id)?;
    b.with_node(id, |b| {
        let kind = b.kind(id)?;
        let ty = b.node_type(id)?;
        match kind {
            NodeKind::Var { read_only: true, .. } => Err(BuildError::type_resolution(
                "cannot assign to a read-only variable",
            )),
            NodeKind::Var { .. } | NodeKind::Property { .. } => Ok((b.build_node(id, None)?, ty)),
            NodeKind::Member { node, name } => {
                let (base, _) = build_lvalue(b, node)?;
                Ok((format!("{base}.{name}"), ty))
            }
            NodeKind::Index { node, index } => {
                let base_id = b.resolve(node)?;
                let base = match b.kind(base_id)? {
                    NodeKind::StorageBuffer { .. } => {
                        let name = b.register_storage(base_id)?;
                        let (emitted, access) = b.use_storage(&name)?;
                        if access == StorageAccess::Read {
                            return Err(BuildError::binding_layout(format!(
                                "storage buffer `{name}` is read-only"
                            )));
                        }
                        emitted
                    }
                    _ => build_lvalue(b, node)?.0,
                };
                let code = index_expression(b, &base, node, index)?;
                Ok((code, ty))
            }
            NodeKind::Split { node, components } => {
                if components.len() > 1 && !b.dialect().swizzle_assignment() {
                    return Err(BuildError::dialect(format!(
                        "{:?} cannot assign to the multi-component swizzle `{components}`",
                        b.dialect().dialect()
                    )));
                }
                let (base, base_ty) = build_lvalue(b, node)?;
                let swizzle = normalize_swizzle(&components, base_ty.components())?;
                Ok((format!("{base}.{swizzle}"), ty))
            }
            other => Err(BuildError::type_resolution(format!(
                "{} nodes are not assignable",
                other.kind_name()
            ))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{build_compute, compute_source, fragment_source};
    use crate::compiler::graph::{BinaryOp, NodeGraph};
    use crate::compiler::types::{Dialect, NodeType};

    fn scenario_sin_var(dialect: Dialect) -> String {
        let mut g = NodeGraph::new();
        let time = g.uniform("time", NodeType::Float);
        let s = g.sin(time);
        let var = g.to_var(s, Some("s"));
        fragment_source(&g, var, dialect)
    }

    #[test]
    fn test_named_var_glsl() {
        let src = scenario_sin_var(Dialect::Glsl);
        assert!(src.contains("    float s = sin(time);\n    fragColor = vec4(s);"), "{src}");
    }

    #[test]
    fn test_named_var_wgsl() {
        let src = scenario_sin_var(Dialect::Wgsl);
        assert!(src.contains("var s: f32 = sin(objectUniforms.time);"), "{src}");
    }

    #[test]
    fn test_const_var_glsl() {
        let mut g = NodeGraph::new();
        let two = g.float(2.0);
        let k = g.to_const(two, Some("k"));
        let src = fragment_source(&g, k, Dialect::Glsl);
        assert!(src.contains("const float k = 2.0;"), "{src}");
    }

    #[test]
    fn test_assign_and_compound_assign() {
        let mut g = NodeGraph::new();
        let zero = g.float(0.0);
        let acc = g.to_var(zero, Some("acc"));
        let one = g.float(1.0);
        let set = g.assign(acc, one);
        let two = g.float(2.0);
        let bump = g.assign_op(acc, BinaryOp::Mul, two);
        let body = g.stack(&[set, bump], None);
        let src = compute_source(&g, body, Dialect::Wgsl);
        assert!(src.contains("var acc: f32 = 0.0;\n    acc = 1.0;\n    acc *= 2.0;"), "{src}");
    }

    #[test]
    fn test_read_only_assignment_fails() {
        let mut g = NodeGraph::new();
        let zero = g.float(0.0);
        let k = g.to_const(zero, Some("k"));
        let one = g.float(1.0);
        let set = g.assign(k, one);
        let err = build_compute(&g, set, Dialect::Glsl).unwrap_err();
        assert!(err.is_type_resolution());
    }

    #[test]
    fn test_swizzle_assignment_by_dialect() {
        let mut g = NodeGraph::new();
        let init = g.vec3(0.0, 0.0, 0.0);
        let v = g.to_var(init, Some("v"));
        let xy = g.split(v, "xy");
        let val = g.vec2(1.0, 2.0);
        let set = g.assign(xy, val);
        let src = compute_source(&g, set, Dialect::Glsl);
        assert!(src.contains("v.xy = vec2(1.0, 2.0);"), "{src}");
        let err = build_compute(&g, set, Dialect::Wgsl).unwrap_err();
        assert!(err.is_dialect());
    }

    #[test]
    fn test_assigning_an_expression_fails() {
        let mut g = NodeGraph::new();
        let a = g.float(1.0);
        let b = g.float(2.0);
        let sum = g.add(a, b);
        let set = g.assign(sum, a);
        let err = build_compute(&g, set, Dialect::Wgsl).unwrap_err();
        assert!(err.is_type_resolution());
    }

    #[test]
    fn test_property_declared_once_per_stage() {
        let mut g = NodeGraph::new();
        let p = g.property("roughness", NodeType::Float);
        let half = g.float(0.5);
        let set = g.assign(p, half);
        let out = g.stack(&[set], Some(p));
        let src = fragment_source(&g, out, Dialect::Wgsl);
        assert!(src.contains("var roughness: f32;\n    roughness = 0.5;\n    return vec4<f32>(roughness);"), "{src}");
    }
}
