//! Compilers for leaf inputs: constants, uniforms, attributes, varyings, textures and
//! storage buffers.

use crate::compiler::builder::NodeBuilder;
use crate::compiler::error::{BuildError, BuildResult};
use crate::compiler::graph::NodeId;
use crate::compiler::types::{NodeType, ShaderStage};

/// Type of a constant; checks the value count against the declared type.
pub fn const_type(ty: &NodeType, values: &[f64]) -> BuildResult<NodeType> {
    if ty.scalar_kind().is_none() {
        return Err(BuildError::type_resolution(format!(
            "constants must be scalars, vectors or matrices, not {ty}"
        )));
    }
    let n = ty.components() as usize;
    if values.len() > 1 && values.len() != n {
        return Err(BuildError::type_resolution(format!(
            "a {ty} constant takes 1 or {n} values, got {}",
            values.len()
        )));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(BuildError::type_resolution(format!(
            "a {ty} constant cannot hold the non-finite value {v}"
        )));
    }
    Ok(ty.clone())
}

/// Compile a constant to a literal or constructor.
///
/// A single value splats across vectors and fills the diagonal of matrices.
///
/// # Example
/// ```wgsl
/// vec3<f32>(1.0, 0.5, 0.0)
/// ```
pub fn compile_const(b: &mut NodeBuilder, ty: &NodeType, values: &[f64]) -> BuildResult<String> {
    const_type(ty, values)?;
    let d = b.dialect();
    let Some(kind) = ty.scalar_kind() else {
        return Err(BuildError::type_resolution(format!("{ty} has no scalar kind")));
    };
    let first = values.first().copied().unwrap_or(0.0);
    let literals: Vec<String> = match (values.len(), ty.matrix_columns()) {
        (0 | 1, Some(cols)) => (0..cols * cols)
            .map(|i| {
                let v = if i / cols == i % cols { first } else { 0.0 };
                d.scalar_literal(kind, v)
            })
            .collect(),
        (0 | 1, None) => vec![d.scalar_literal(kind, first)],
        _ => values.iter().map(|v| d.scalar_literal(kind, *v)).collect(),
    };
    if ty.is_scalar() {
        return Ok(literals.into_iter().next().unwrap_or_default());
    }
    let name = b.type_name(ty)?;
    Ok(d.constructor(&name, &literals))
}

pub fn compile_uniform(b: &mut NodeBuilder, id: NodeId) -> BuildResult<String> {
    let key = b.register_uniform(id)?;
    b.use_uniform(&key)
}

pub fn compile_attribute(
    b: &mut NodeBuilder,
    name: &str,
    ty: Option<&NodeType>,
) -> BuildResult<String> {
    if b.stage() != ShaderStage::Vertex {
        return Err(BuildError::scope(format!(
            "attribute `{name}` can only be read in the vertex stage; pass it through a varying"
        )));
    }
    b.use_attribute(name, ty)
}

/// Compile a varying read. The vertex stage writes the value on first reference.
pub fn compile_varying(b: &mut NodeBuilder, id: NodeId) -> BuildResult<String> {
    let stage = b.stage();
    if stage == ShaderStage::Compute {
        return Err(BuildError::scope("varyings are not available in compute shaders"));
    }
    let record = b.ensure_varying_assigned(id)?;
    if stage == ShaderStage::Fragment {
        b.mark_varying_read(id);
    }
    Ok(b.dialect().varying_ref(stage, &record.name))
}

/// Compile a texture sample. Outside the fragment stage an explicit level 0 is used,
/// since implicit derivatives only exist there.
pub fn compile_texture(
    b: &mut NodeBuilder,
    name: &str,
    uv: NodeId,
    level: Option<NodeId>,
) -> BuildResult<String> {
    let uv = b.build_node(uv, Some(&NodeType::Vec2))?;
    let level = match level {
        Some(level) => Some(b.build_node(level, Some(&NodeType::Float))?),
        None if b.stage() != ShaderStage::Fragment => Some("0.0".to_string()),
        None => None,
    };
    let (texture, sampler) = b.use_texture(name);
    Ok(b
        .dialect()
        .texture_sample(&texture, &sampler, &uv, level.as_deref()))
}

pub fn compile_storage_buffer(b: &mut NodeBuilder, id: NodeId) -> BuildResult<String> {
    let name = b.register_storage(id)?;
    let (emitted, _) = b.use_storage(&name)?;
    Ok(emitted)
}
