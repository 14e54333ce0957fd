//! Per-kind node compilers.
//!
//! Each node kind has a `*_type` resolver and a `compile_*` generator. Both are reached
//! through the two dispatchers below, which the builder calls with errors already
//! attributed to the node being compiled.

pub mod control_nodes;
pub mod function_nodes;
pub mod input_nodes;
pub mod math_nodes;
pub mod scope_nodes;
pub mod struct_nodes;
pub mod var_nodes;

use super::builder::NodeBuilder;
use super::error::{BuildError, BuildResult};
use super::graph::{NodeId, NodeKind};
use super::types::NodeType;

/// Resolve the output type of `id` (already expanded) in the builder's current context.
pub(crate) fn resolve_node_type(b: &mut NodeBuilder, id: NodeId) -> BuildResult<NodeType> {
    let kind = b.kind(id)?;
    match kind {
        // Inputs
        NodeKind::Const { ty, values } => input_nodes::const_type(&ty, &values),
        NodeKind::Uniform { ty, .. } => Ok(ty),
        NodeKind::Attribute { name, ty } => b.attribute_type(&name, ty.as_ref()),
        NodeKind::Varying { node, .. } => b.node_type(node),
        NodeKind::Property { ty, .. } => Ok(ty),
        NodeKind::Builtin(builtin) => Ok(builtin.node_type()),
        NodeKind::Texture { .. } => Ok(NodeType::Vec4),
        NodeKind::StorageBuffer { element, count, .. } => {
            Ok(NodeType::Array(Box::new(element), count.unwrap_or(0)))
        }

        // Variables
        NodeKind::Var { node, .. } => var_nodes::var_type(b, node),
        NodeKind::Assign { .. } => Ok(NodeType::Void),

        // Math
        NodeKind::Operator { op, left, right } => {
            let (l, r) = (b.node_type(left)?, b.node_type(right)?);
            math_nodes::operator_type(op, &l, &r)
        }
        NodeKind::Unary { op, node } => {
            let ty = b.node_type(node)?;
            math_nodes::unary_type(op, &ty)
        }
        NodeKind::Math { method, args } => {
            let types = args
                .iter()
                .map(|a| b.node_type(*a))
                .collect::<BuildResult<Vec<_>>>()?;
            math_nodes::math_type(method, &types)
        }
        NodeKind::Split { node, components } => {
            let ty = b.node_type(node)?;
            math_nodes::split_type(&ty, &components)
        }
        NodeKind::Join { nodes, ty } => {
            let types = nodes
                .iter()
                .map(|n| b.node_type(*n))
                .collect::<BuildResult<Vec<_>>>()?;
            math_nodes::join_type(&types, ty.as_ref())
        }
        NodeKind::Convert { to, .. } => Ok(to),

        // Control flow
        NodeKind::Conditional {
            cond,
            if_node,
            else_node,
        } => control_nodes::conditional_type(b, cond, if_node, else_node),
        NodeKind::Loop { .. } | NodeKind::Break | NodeKind::Continue => Ok(NodeType::Void),
        NodeKind::LoopIndex { loop_node, param } => control_nodes::loop_index_type(b, loop_node, param),
        NodeKind::Stack { output, .. } => match output {
            Some(o) => b.node_type(o),
            None => Ok(NodeType::Void),
        },

        // Aggregates
        NodeKind::StructType { name, .. } => Ok(NodeType::Struct(name)),
        NodeKind::Struct { layout, .. } => struct_nodes::struct_type(b, layout),
        NodeKind::Array { element, values } => struct_nodes::array_type(&element, values.len()),
        NodeKind::Member { node, name } => struct_nodes::member_type(b, node, &name),
        NodeKind::Index { node, index } => struct_nodes::index_type(b, node, index),

        // Scopes and functions
        NodeKind::Context { node, values } => b.in_context(id, values, |b| b.node_type(node)),
        NodeKind::ContextValue { key, fallback } => {
            b.with_context_value(&key, fallback, |b, node| b.node_type(node))
        }
        NodeKind::Cache { node, .. } => b.node_type(node),
        NodeKind::FunctionCall { function, .. } => {
            Ok(b.register_function(function)?.return_type)
        }

        NodeKind::Remap { .. } | NodeKind::Custom(_) => Err(BuildError::graph(
            "node was not expanded before type resolution",
        )),
    }
}

/// Generate code for `id` (already expanded). Statement-like nodes return an empty string.
pub(crate) fn generate_node(b: &mut NodeBuilder, id: NodeId) -> BuildResult<String> {
    let kind = b.kind(id)?;
    match kind {
        // Inputs
        NodeKind::Const { ty, values } => input_nodes::compile_const(b, &ty, &values),
        NodeKind::Uniform { .. } => input_nodes::compile_uniform(b, id),
        NodeKind::Attribute { name, ty } => input_nodes::compile_attribute(b, &name, ty.as_ref()),
        NodeKind::Varying { .. } => input_nodes::compile_varying(b, id),
        NodeKind::Property { name, ty } => b.use_property(&name, &ty),
        NodeKind::Builtin(builtin) => b.use_builtin(builtin),
        NodeKind::Texture { name, uv, level } => {
            b.build_temp(id, false, |b| input_nodes::compile_texture(b, &name, uv, level))
        }
        NodeKind::StorageBuffer { .. } => input_nodes::compile_storage_buffer(b, id),

        // Variables
        NodeKind::Var {
            node,
            name,
            read_only,
        } => var_nodes::compile_var(b, id, node, name.as_deref(), read_only),
        NodeKind::Assign { target, value, op } => var_nodes::compile_assign(b, target, value, op),

        // Math
        NodeKind::Operator { op, left, right } => {
            b.build_temp(id, false, |b| math_nodes::compile_operator(b, op, left, right))
        }
        NodeKind::Unary { op, node } => {
            b.build_temp(id, false, |b| math_nodes::compile_unary(b, op, node))
        }
        NodeKind::Math { method, args } => {
            b.build_temp(id, false, |b| math_nodes::compile_math(b, id, method, &args))
        }
        NodeKind::Split { node, components } => math_nodes::compile_split(b, node, &components),
        NodeKind::Join { nodes, .. } => {
            b.build_temp(id, false, |b| math_nodes::compile_join(b, id, &nodes))
        }
        NodeKind::Convert { node, to } => {
            b.build_temp(id, false, |b| math_nodes::compile_convert(b, node, &to))
        }

        // Control flow
        NodeKind::Conditional {
            cond,
            if_node,
            else_node,
        } => control_nodes::compile_conditional(b, id, cond, if_node, else_node),
        NodeKind::Loop { params, body } => control_nodes::compile_loop(b, id, &params, body),
        NodeKind::LoopIndex { loop_node, param } => {
            control_nodes::compile_loop_index(b, loop_node, param)
        }
        NodeKind::Break => control_nodes::compile_jump(b, "break"),
        NodeKind::Continue => control_nodes::compile_jump(b, "continue"),
        NodeKind::Stack { nodes, output } => control_nodes::compile_stack(b, &nodes, output),

        // Aggregates
        NodeKind::StructType { name, .. } => Err(BuildError::type_resolution(format!(
            "struct layout `{name}` is not a value; construct it with a Struct node"
        ))),
        NodeKind::Struct { values, .. } => {
            b.build_temp(id, false, |b| struct_nodes::compile_struct(b, id, &values))
        }
        NodeKind::Array { element, values } => {
            b.build_temp(id, false, |b| struct_nodes::compile_array(b, &element, &values))
        }
        NodeKind::Member { node, name } => struct_nodes::compile_member(b, node, &name),
        NodeKind::Index { node, index } => struct_nodes::compile_index(b, node, index),

        // Scopes and functions
        NodeKind::Context { node, values } => scope_nodes::compile_context(b, id, node, values),
        NodeKind::ContextValue { key, fallback } => {
            scope_nodes::compile_context_value(b, &key, fallback)
        }
        NodeKind::Cache { node, parent } => scope_nodes::compile_cache(b, id, node, parent),
        NodeKind::FunctionCall { function, args } => {
            function_nodes::compile_function_call(b, id, function, &args)
        }

        NodeKind::Remap { .. } | NodeKind::Custom(_) => Err(BuildError::graph(
            "node was not expanded before generation",
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::compiler::builder::{BuildOptions, BuildRequest, NodeBuilder};
    use crate::compiler::error::BuildResult;
    use crate::compiler::graph::{NodeGraph, NodeId};
    use crate::compiler::state::NodeBuilderState;
    use crate::compiler::types::Dialect;

    /// Build `root` as the fragment output of a single-stage build.
    pub fn build_fragment(graph: &NodeGraph, root: NodeId, dialect: Dialect) -> BuildResult<NodeBuilderState> {
        NodeBuilder::new(graph, BuildOptions::default().with_dialect(dialect))
            .build(&BuildRequest::new().fragment(root))
    }

    pub fn fragment_source(graph: &NodeGraph, root: NodeId, dialect: Dialect) -> String {
        build_fragment(graph, root, dialect)
            .unwrap()
            .fragment_shader()
            .unwrap()
            .to_string()
    }

    pub fn build_compute(graph: &NodeGraph, root: NodeId, dialect: Dialect) -> BuildResult<NodeBuilderState> {
        NodeBuilder::new(graph, BuildOptions::default().with_dialect(dialect))
            .build(&BuildRequest::new().compute(root))
    }

    pub fn compute_source(graph: &NodeGraph, root: NodeId, dialect: Dialect) -> String {
        build_compute(graph, root, dialect)
            .unwrap()
            .compute_shader()
            .unwrap()
            .to_string()
    }
}
