//! Compilers for structs, arrays, member access and indexing.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::{NodeId, NodeKind};
use crate::compiler::types::NodeType;

pub fn struct_type(b: &mut NodeBuilder, layout: NodeId) -> BuildResult<NodeType> {
    let layout = b.resolve(layout)?;
    match b.kind(layout)? {
        NodeKind::StructType { name, .. } => Ok(NodeType::Struct(name)),
        other => Err(BuildError::graph(format!(
            "struct layout must be a StructType node, found {}",
            other.kind_name()
        ))),
    }
}

pub fn array_type(element: &NodeType, len: usize) -> BuildResult<NodeType> {
    if len == 0 {
        return Err(BuildError::type_resolution("array constructors need at least one value"));
    }
    if matches!(element, NodeType::Void | NodeType::Texture2D) {
        return Err(BuildError::type_resolution(format!("cannot build an array of {element}")));
    }
    Ok(NodeType::Array(Box::new(element.clone()), len as u32))
}

pub fn member_type(b: &mut NodeBuilder, node: NodeId, name: &str) -> BuildResult<NodeType> {
    let base = b.node_type(node)?;
    let NodeType::Struct(struct_name) = &base else {
        return Err(BuildError::type_resolution(format!(
            "cannot read member `{name}` of {base}"
        )));
    };
    b.struct_members(struct_name)?
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.ty.clone())
        .ok_or_else(|| {
            BuildError::type_resolution(format!("struct `{struct_name}` has no member `{name}`"))
        })
}

pub fn index_type(b: &mut NodeBuilder, node: NodeId, index: NodeId) -> BuildResult<NodeType> {
    let base = b.node_type(node)?;
    let index_ty = b.node_type(index)?;
    if !matches!(index_ty, NodeType::Int | NodeType::Uint) {
        return Err(BuildError::type_resolution(format!(
            "indices must be int or uint, got {index_ty}"
        )));
    }
    base.element_type()
        .ok_or_else(|| BuildError::type_resolution(format!("cannot index into {base}")))
}

/// Construct a struct value; values follow the declared member order.
///
/// # Example
/// ```wgsl
/// Light(vec3<f32>(1.0, 1.0, 1.0), 2.0)
/// ```
pub fn compile_struct(b: &mut NodeBuilder, id: NodeId, values: &[NodeId]) -> BuildResult<String> {
    let ty = b.node_type(id)?;
    let NodeType::Struct(name) = &ty else {
        return Err(BuildError::type_resolution(format!("{ty} is not a struct")));
    };
    let members = b.struct_members(name)?.to_vec();
    if members.len() != values.len() {
        return Err(BuildError::binding_layout(format!(
            "struct `{name}` has {} members, got {} values",
            members.len(),
            values.len()
        )));
    }
    let mut args = Vec::with_capacity(values.len());
    for (value, member) in values.iter().zip(&members) {
        args.push(b.build_node(*value, Some(&member.ty))?);
    }
    let type_name = b.type_name(&ty)?;
    Ok(b.dialect().constructor(&type_name, &args))
}

pub fn compile_array(b: &mut NodeBuilder, element: &NodeType, values: &[NodeId]) -> BuildResult<String> {
    let ty = array_type(element, values.len())?;
    let mut args = Vec::with_capacity(values.len());
    for value in values {
        args.push(b.build_node(*value, Some(element))?);
    }
    let type_name = b.type_name(&ty)?;
    Ok(b.dialect().constructor(&type_name, &args))
}

pub fn compile_member(b: &mut NodeBuilder, node: NodeId, name: &str) -> BuildResult<String> {
    member_type(b, node, name)?;
    let base = b.build_node(node, None)?;
    Ok(format!("{base}.{name}"))
}

pub fn compile_index(b: &mut NodeBuilder, node: NodeId, index: NodeId) -> BuildResult<String> {
    let base = b.build_node(node, None)?;
    index_expression(b, &base, node, index)
}

/// `base[index]`, rejecting constant indices that fall outside a fixed-size base.
pub fn index_expression(
    b: &mut NodeBuilder,
    base: &str,
    node: NodeId,
    index: NodeId,
) -> BuildResult<String> {
    index_type(b, node, index)?;
    let base_ty = b.node_type(node)?;
    let bound = match &base_ty {
        NodeType::Array(_, 0) => None,
        NodeType::Array(_, n) => Some(*n),
        other => other.matrix_columns().or(Some(other.components())),
    };
    if let NodeKind::Const { values, .. } = b.kind(b.resolve(index)?)? {
        let at = values.first().copied().unwrap_or(0.0);
        if let Some(bound) = bound {
            if at < 0.0 || at >= f64::from(bound) {
                return Err(BuildError::binding_layout(format!(
                    "index {at} is out of bounds for {base_ty}"
                )));
            }
        }
    }
    let index_ty = b.node_type(index)?;
    let index_code = b.build_node(index, Some(&index_ty))?;
    Ok(format!("{base}[{index_code}]"))
}
