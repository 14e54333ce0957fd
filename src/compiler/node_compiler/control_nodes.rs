//! Compilers for conditionals, loops, jumps and statement stacks.

use std::collections::HashSet;

use crate::compiler::builder::{ActiveLoop, LOOP_NAMES, NodeBuilder};
use crate::compiler::dialect::VarKind;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{BinaryOp, LoopBound, LoopParam, NodeId, NodeKind};
use crate::compiler::types::{NodeType, ScalarKind};

pub fn conditional_type(
    b: &mut NodeBuilder,
    cond: NodeId,
    if_node: NodeId,
    else_node: Option<NodeId>,
) -> BuildResult<NodeType> {
    let cond_ty = b.node_type(cond)?;
    if cond_ty != NodeType::Bool {
        return Err(BuildError::type_resolution(format!(
            "conditions must be bool, got {cond_ty}"
        )));
    }
    let Some(else_node) = else_node else {
        return Ok(NodeType::Void);
    };
    let if_ty = b.node_type(if_node)?;
    let else_ty = b.node_type(else_node)?;
    if if_ty != else_ty {
        return Err(BuildError::type_resolution(format!(
            "conditional branches disagree: {if_ty} and {else_ty}"
        )));
    }
    Ok(if_ty)
}

/// Whether generating `id` can only produce an expression, never a statement.
fn is_pure(b: &NodeBuilder, id: NodeId, seen: &mut HashSet<NodeId>) -> BuildResult<bool> {
    let id = b.resolve(id)?;
    if !seen.insert(id) {
        return Ok(true);
    }
    let kind = b.kind(id)?;
    let impure = match &kind {
        NodeKind::Assign { .. }
        | NodeKind::FunctionCall { .. }
        | NodeKind::Loop { .. }
        | NodeKind::Break
        | NodeKind::Continue
        | NodeKind::Var { .. } => true,
        NodeKind::Stack { nodes, .. } => !nodes.is_empty(),
        NodeKind::Conditional { else_node, .. } => else_node.is_none(),
        _ => false,
    };
    if impure {
        return Ok(false);
    }
    for child in kind.children() {
        if !is_pure(b, child, seen)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Run `f` inside a fresh flow block and return the block's lines. The block closes even
/// when `f` fails.
fn in_block(
    b: &mut NodeBuilder,
    f: impl FnOnce(&mut NodeBuilder) -> BuildResult<()>,
) -> BuildResult<Vec<String>> {
    b.open_block();
    let result = f(b);
    let lines = b.close_block();
    result.map(|()| lines)
}

fn emit_if_else(b: &mut NodeBuilder, cond: &str, then_lines: Vec<String>, else_lines: Option<Vec<String>>) {
    let header = format!("if ({cond}) {{");
    match else_lines {
        None => b.emit_block(header, then_lines, "}"),
        Some(else_lines) => {
            b.emit_block(header, then_lines, "} else {");
            for line in else_lines {
                b.add_line(format!("    {line}"));
            }
            b.add_line("}");
        }
    }
}

/// Compile a conditional.
///
/// Value-producing conditionals whose branches are plain expressions become a `select`;
/// otherwise the branches are emitted as an `if`/`else` writing a result variable.
///
/// # Example
/// ```glsl
/// (x > 0.5 ? vec3(1.0, 0.0, 0.0) : vec3(0.0, 1.0, 0.0))
/// ```
pub fn compile_conditional(
    b: &mut NodeBuilder,
    id: NodeId,
    cond: NodeId,
    if_node: NodeId,
    else_node: Option<NodeId>,
) -> BuildResult<String> {
    if let Some(code) = b.cached_snippet(id) {
        return Ok(code);
    }
    let ty = b.node_type(id)?;
    let cond_code = b.build_node(cond, Some(&NodeType::Bool))?;

    let Some(else_node) = else_node else {
        let then_lines = in_block(b, |b| b.build_statement(if_node))?;
        emit_if_else(b, &cond_code, then_lines, None);
        return Ok(String::new());
    };

    if ty == NodeType::Void {
        let then_lines = in_block(b, |b| b.build_statement(if_node))?;
        let else_lines = in_block(b, |b| b.build_statement(else_node))?;
        emit_if_else(b, &cond_code, then_lines, Some(else_lines));
        return Ok(String::new());
    }

    let mut seen = HashSet::new();
    if is_pure(b, if_node, &mut seen)? && is_pure(b, else_node, &mut seen)? {
        return b.build_temp(id, false, |b| {
            let if_code = b.build_node(if_node, Some(&ty))?;
            let else_code = b.build_node(else_node, Some(&ty))?;
            Ok(b.dialect().select(&cond_code, &if_code, &else_code))
        });
    }

    let type_name = b.type_name(&ty)?;
    let result = b.claim_temp();
    let decl = b.dialect().var_decl(&result, &type_name, None, VarKind::Mutable);
    b.add_line(decl);
    let then_lines = in_block(b, |b| {
        let code = b.build_node(if_node, Some(&ty))?;
        b.add_line(format!("{result} = {code};"));
        Ok(())
    })?;
    let else_lines = in_block(b, |b| {
        let code = b.build_node(else_node, Some(&ty))?;
        b.add_line(format!("{result} = {code};"));
        Ok(())
    })?;
    emit_if_else(b, &cond_code, then_lines, Some(else_lines));
    b.cache_snippet(id, &result);
    Ok(result)
}

fn loop_param<'a>(params: &'a [LoopParam], param: usize) -> BuildResult<&'a LoopParam> {
    params.get(param).ok_or_else(|| {
        BuildError::graph(format!(
            "loop has {} parameters, index {param} requested",
            params.len()
        ))
    })
}

fn counter_kind(ty: &NodeType) -> BuildResult<ScalarKind> {
    match ty {
        NodeType::Int => Ok(ScalarKind::Int),
        NodeType::Uint => Ok(ScalarKind::Uint),
        NodeType::Float => Ok(ScalarKind::Float),
        other => Err(BuildError::type_resolution(format!(
            "loop counters must be int, uint or float, not {other}"
        ))),
    }
}

pub fn loop_index_type(b: &mut NodeBuilder, loop_node: NodeId, param: usize) -> BuildResult<NodeType> {
    let loop_node = b.resolve(loop_node)?;
    match b.kind(loop_node)? {
        NodeKind::Loop { params, .. } => Ok(loop_param(&params, param)?.ty.clone()),
        other => Err(BuildError::graph(format!(
            "loop index refers to a {} node",
            other.kind_name()
        ))),
    }
}

fn bound_code(b: &mut NodeBuilder, bound: &LoopBound, ty: &NodeType, kind: ScalarKind) -> BuildResult<String> {
    match bound {
        LoopBound::Value(v) => Ok(b.dialect().scalar_literal(kind, *v)),
        LoopBound::Node(node) => b.build_node(*node, Some(ty)),
    }
}

/// Compile a loop; each parameter opens one nested `for`.
///
/// Counters take `i`, `j`, `k`... by nesting depth unless the parameter names one.
///
/// # Example
/// ```glsl
/// for (int i = 0; i < 5; i++) {
///     for (int j = 0; j < 10; j++) {
///         acc += 1.0;
///     }
/// }
/// ```
pub fn compile_loop(
    b: &mut NodeBuilder,
    id: NodeId,
    params: &[LoopParam],
    body: Option<NodeId>,
) -> BuildResult<String> {
    if params.is_empty() {
        return Err(BuildError::type_resolution("loops need at least one parameter"));
    }
    emit_loop_level(b, id, params, 0, body)?;
    Ok(String::new())
}

fn emit_loop_level(
    b: &mut NodeBuilder,
    id: NodeId,
    params: &[LoopParam],
    level: usize,
    body: Option<NodeId>,
) -> BuildResult<()> {
    let Some(param) = params.get(level) else {
        return match body {
            Some(body) => b.build_statement(body),
            None => Ok(()),
        };
    };
    let kind = counter_kind(&param.ty)?;
    let condition = param.resolved_condition();
    if !condition.is_comparison() || matches!(condition, BinaryOp::Eq) {
        return Err(BuildError::type_resolution(format!(
            "`{}` cannot terminate a loop",
            condition.symbol()
        )));
    }
    let step = param.step.abs();
    if step == 0.0 || !step.is_finite() {
        return Err(BuildError::type_resolution("loop steps must be nonzero"));
    }

    let depth = b.loop_depth();
    let var = match (&param.name, LOOP_NAMES.get(depth)) {
        (Some(name), _) => b.claim_local(name),
        (None, Some(preferred)) => b.claim_local(preferred),
        (None, None) => b.claim_local(&format!("i{depth}")),
    };
    let type_name = b.type_name(&param.ty)?;
    let start = bound_code(b, &param.start, &param.ty, kind)?;
    let end = bound_code(b, &param.end, &param.ty, kind)?;
    let descending = matches!(condition, BinaryOp::Gt | BinaryOp::Ge);
    let update = if kind != ScalarKind::Float && step == 1.0 {
        format!("{var}{}", if descending { "--" } else { "++" })
    } else {
        let literal = b.dialect().scalar_literal(kind, step);
        format!("{var} {}= {literal}", if descending { "-" } else { "+" })
    };
    let cond = format!("{var} {} {end}", condition.symbol());
    let header = b.dialect().for_header(&var, &type_name, &start, &cond, &update);

    b.push_loop(ActiveLoop {
        node: id,
        param: level,
        var: var.clone(),
    });
    let result = in_block(b, |b| emit_loop_level(b, id, params, level + 1, body));
    b.pop_loop();
    b.release_local(&var);
    b.emit_block(header, result?, "}");
    Ok(())
}

pub fn compile_loop_index(b: &mut NodeBuilder, loop_node: NodeId, param: usize) -> BuildResult<String> {
    let loop_node = b.resolve(loop_node)?;
    b.loop_var(loop_node, param)
        .ok_or_else(|| BuildError::scope("loop index used outside of its loop"))
}

/// `break;` or `continue;`.
pub fn compile_jump(b: &mut NodeBuilder, keyword: &str) -> BuildResult<String> {
    if b.loop_depth() == 0 {
        return Err(BuildError::scope(format!("`{keyword}` outside of a loop")));
    }
    b.add_line(format!("{keyword};"));
    Ok(String::new())
}

pub fn compile_stack(b: &mut NodeBuilder, nodes: &[NodeId], output: Option<NodeId>) -> BuildResult<String> {
    for node in nodes {
        b.build_statement(*node)?;
    }
    match output {
        Some(output) => b.build_node(output, None),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{build_compute, build_fragment, compute_source, fragment_source};
    use crate::compiler::graph::{BinaryOp, LoopParam, NodeGraph};
    use crate::compiler::types::{Dialect, NodeType};

    #[test]
    fn test_nested_loops_use_distinct_counters() {
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
        let src = compute_source(&g, body, Dialect::Glsl);
        let expected = "    for (int i = 0; i < 5; i++) {\n        for (int j = 0; j < 10; j++) {\n            acc += 1.0;\n        }\n    }";
        assert!(src.contains(expected), "{src}");
    }

    #[test]
    fn test_counter_names_yield_to_user_vars() {
        let mut g = NodeGraph::new();
        let zero = g.int(0);
        let total = g.to_var(zero, Some("i"));
        let first = g.loop_(vec![LoopParam::count(2)], |g, idx| g.assign_op(total, BinaryOp::Add, idx[0]));
        let second = g.loop_(vec![LoopParam::count(3)], |g, idx| g.assign_op(total, BinaryOp::Add, idx[0]));
        let body = g.stack(&[total, first, second], None);
        let src = compute_source(&g, body, Dialect::Wgsl);
        assert!(src.contains("var i: i32 = 0;"), "{src}");
        assert!(src.contains("for (var i_1: i32 = 0; i_1 < 2; i_1++) {"), "{src}");
        assert!(src.contains("for (var i_1: i32 = 0; i_1 < 3; i_1++) {"), "{src}");
        assert_eq!(src.matches("i += i_1;").count(), 2, "{src}");
    }

    #[test]
    fn test_sibling_loops_reuse_counter_name() {
        let mut g = NodeGraph::new();
        let zero = g.float(0.0);
        let acc = g.to_var(zero, Some("acc"));
        let one = g.float(1.0);
        let first = g.loop_(vec![LoopParam::count(2)], |g, _| g.assign_op(acc, BinaryOp::Add, one));
        let second = g.loop_(vec![LoopParam::count(4)], |g, _| g.assign_op(acc, BinaryOp::Sub, one));
        let body = g.stack(&[acc, first, second], None);
        let src = compute_source(&g, body, Dialect::Glsl);
        assert!(src.contains("for (int i = 0; i < 2; i++) {"), "{src}");
        assert!(src.contains("for (int i = 0; i < 4; i++) {"), "{src}");
    }

    #[test]
    fn test_multi_param_loop_and_indices() {
        let mut g = NodeGraph::new();
        let zero = g.int(0);
        let acc = g.to_var(zero, Some("acc"));
        let lp = g.loop_(vec![LoopParam::count(2), LoopParam::count(3)], |g, idx| {
            let prod = g.mul(idx[0], idx[1]);
            g.assign_op(acc, BinaryOp::Add, prod)
        });
        let body = g.stack(&[acc, lp], None);
        let src = compute_source(&g, body, Dialect::Wgsl);
        assert!(src.contains("for (var i: i32 = 0; i < 2; i++) {"), "{src}");
        assert!(src.contains("for (var j: i32 = 0; j < 3; j++) {"), "{src}");
        assert!(src.contains("acc += (i * j);"), "{src}");
    }

    #[test]
    fn test_descending_float_loop() {
        let mut g = NodeGraph::new();
        let lp = g.loop_(
            vec![LoopParam::range(8, 0).with_type(NodeType::Float).with_step(2.0)],
            |g, _| g.brk(),
        );
        let src = compute_source(&g, lp, Dialect::Glsl);
        assert!(src.contains("for (float i = 8.0; i > 0.0; i -= 2.0) {\n        break;\n    }"), "{src}");
    }

    #[test]
    fn test_loop_index_outside_loop() {
        let mut g = NodeGraph::new();
        let lp = g.loop_(vec![LoopParam::count(4)], |g, _| g.stack(&[], None));
        let stray = g.push(crate::compiler::graph::NodeKind::LoopIndex { loop_node: lp, param: 0 });
        let var = g.to_var(stray, None);
        let err = build_compute(&g, var, Dialect::Wgsl).unwrap_err();
        assert!(err.is_scope());
    }

    #[test]
    fn test_break_outside_loop() {
        let mut g = NodeGraph::new();
        let brk = g.brk();
        let err = build_compute(&g, brk, Dialect::Glsl).unwrap_err();
        assert!(err.is_scope());
    }

    #[test]
    fn test_pure_conditional_becomes_select() {
        let mut g = NodeGraph::new();
        let x = g.uniform("x", NodeType::Float);
        let half = g.float(0.5);
        let cond = g.greater_than(x, half);
        let red = g.vec3(1.0, 0.0, 0.0);
        let green = g.vec3(0.0, 1.0, 0.0);
        let pick = g.select(cond, red, green);
        let color = g.convert(pick, NodeType::Vec4);
        let src = fragment_source(&g, color, Dialect::Glsl);
        assert!(src.contains("(x > 0.5) ? vec3(1.0, 0.0, 0.0) : vec3(0.0, 1.0, 0.0)"), "{src}");
        let src = fragment_source(&g, color, Dialect::Wgsl);
        assert!(
            src.contains("select(vec3<f32>(0.0, 1.0, 0.0), vec3<f32>(1.0, 0.0, 0.0), (objectUniforms.x > 0.5))"),
            "{src}"
        );
    }

    #[test]
    fn test_conditional_branch_mismatch() {
        let mut g = NodeGraph::new();
        let cond = g.boolean(true);
        let a = g.vec3(1.0, 0.0, 0.0);
        let b = g.float(1.0);
        let pick = g.select(cond, a, b);
        let err = build_fragment(&g, pick, Dialect::Wgsl).unwrap_err();
        assert!(err.is_type_resolution());
    }

    #[test]
    fn test_non_bool_condition() {
        let mut g = NodeGraph::new();
        let cond = g.float(1.0);
        let a = g.float(1.0);
        let b = g.float(0.0);
        let pick = g.select(cond, a, b);
        let err = build_fragment(&g, pick, Dialect::Glsl).unwrap_err();
        assert!(err.is_type_resolution());
    }

    #[test]
    fn test_impure_conditional_writes_result_var() {
        let mut g = NodeGraph::new();
        let zero = g.float(0.0);
        let acc = g.to_var(zero, Some("acc"));
        let one = g.float(1.0);
        let bump = g.assign_op(acc, BinaryOp::Add, one);
        let then = g.stack(&[bump], Some(acc));
        let cond = g.boolean(true);
        let pick = g.select(cond, then, zero);
        let root = g.stack(&[acc], Some(pick));
        let src = fragment_source(&g, root, Dialect::Glsl);
        assert!(
            src.contains("    float nodeVar0;\n    if (true) {\n        acc += 1.0;\n        nodeVar0 = acc;\n    } else {\n        nodeVar0 = 0.0;\n    }"),
            "{src}"
        );
        assert!(src.contains("fragColor = vec4(nodeVar0);"), "{src}");
    }

    #[test]
    fn test_if_without_else_is_statement() {
        let mut g = NodeGraph::new();
        let zero = g.float(0.0);
        let acc = g.to_var(zero, Some("acc"));
        let t = g.uniform("threshold", NodeType::Float);
        let cond = g.less_than(acc, t);
        let one = g.float(1.0);
        let set = g.assign(acc, one);
        let guard = g.if_then(cond, set);
        let body = g.stack(&[guard], Some(acc));
        let src = fragment_source(&g, body, Dialect::Wgsl);
        assert!(
            src.contains("if ((acc < objectUniforms.threshold)) {\n        acc = 1.0;\n    }"),
            "{src}"
        );
    }
}
