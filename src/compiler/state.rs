//! Immutable result of a build.

use serde::Serialize;

use super::graph::NodeId;
use super::types::{Dialect, Interpolation, NodeType, Sampling, ScalarKind, ShaderStage, UpdateType};

/// A uniform value referenced by the build.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUniform {
    pub name: String,
    pub ty: NodeType,
    pub group: String,
    pub update: UpdateType,
    pub value: Vec<f32>,
    pub node: NodeId,
}

/// A vertex attribute read by the vertex stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttribute {
    pub name: String,
    pub ty: NodeType,
    pub location: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVarying {
    pub name: String,
    pub ty: NodeType,
    pub location: u32,
    pub interpolation: Interpolation,
    pub sampling: Option<Sampling>,
}

/// A native function emitted into one or more stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCode {
    pub name: String,
    pub code: String,
    pub stages: Vec<ShaderStage>,
}

/// A node the renderer has to refresh at `cadence`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    pub graph: u64,
    pub node: NodeId,
    pub label: String,
    pub cadence: UpdateType,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformMember {
    pub name: String,
    pub ty: NodeType,
    pub offset: u32,
    pub size: u32,
    pub value: Vec<f32>,
}

/// One uniform group laid out with std140 rules.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformBufferBinding {
    pub group: String,
    pub block: String,
    pub binding: u32,
    pub cadence: UpdateType,
    pub size: u32,
    pub members: Vec<UniformMember>,
    pub visibility: Vec<ShaderStage>,
}

fn align_up(v: u32, align: u32) -> u32 {
    v.div_ceil(align) * align
}

/// Lay `(name, type, default)` members out with std140 offsets; returns members and block size.
pub fn std140_layout(members: &[(String, NodeType, Vec<f32>)]) -> (Vec<UniformMember>, u32) {
    let mut offset = 0u32;
    let mut out = Vec::with_capacity(members.len());
    for (name, ty, value) in members {
        let (align, size) = ty.uniform_layout().unwrap_or((16, 16));
        offset = align_up(offset, align);
        out.push(UniformMember {
            name: name.clone(),
            ty: ty.clone(),
            offset,
            size,
            value: value.clone(),
        });
        offset += size;
    }
    (out, align_up(offset.max(16), 16))
}

/// Expand a default value to every component (single values splat, matrices get a diagonal).
fn expand_value(ty: &NodeType, value: &[f32]) -> Vec<f32> {
    let n = ty.components() as usize;
    match (value.len(), ty.matrix_columns()) {
        (1, Some(cols)) => {
            let cols = cols as usize;
            (0..n)
                .map(|i| if i / cols == i % cols { value[0] } else { 0.0 })
                .collect()
        }
        (1, None) => vec![value[0]; n],
        _ => (0..n).map(|i| value.get(i).copied().unwrap_or(0.0)).collect(),
    }
}

impl UniformBufferBinding {
    /// Pack member defaults into a buffer matching the block layout.
    pub fn pack_defaults(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size as usize];
        for member in &self.members {
            let values = expand_value(&member.ty, &member.value);
            let rows = match member.ty.matrix_columns() {
                Some(cols) => cols as usize,
                None => values.len().max(1),
            };
            for (i, v) in values.iter().enumerate() {
                // Matrix columns start on 16-byte boundaries.
                let at = match member.ty.matrix_columns() {
                    Some(_) => member.offset as usize + (i / rows) * 16 + (i % rows) * 4,
                    None => member.offset as usize + i * 4,
                };
                let Some(dst) = bytes.get_mut(at..at + 4) else {
                    continue;
                };
                match member.ty.scalar_kind() {
                    Some(ScalarKind::Int) => dst.copy_from_slice(bytemuck::bytes_of(&(*v as i32))),
                    Some(ScalarKind::Uint) => {
                        dst.copy_from_slice(bytemuck::bytes_of(&(v.max(0.0) as u32)))
                    }
                    _ => dst.copy_from_slice(bytemuck::bytes_of(v)),
                }
            }
        }
        bytes
    }
}

/// A resource binding in group/set 0.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Binding {
    UniformBuffer(UniformBufferBinding),
    #[serde(rename_all = "camelCase")]
    Texture {
        name: String,
        binding: u32,
        visibility: Vec<ShaderStage>,
    },
    #[serde(rename_all = "camelCase")]
    Sampler {
        name: String,
        binding: u32,
        visibility: Vec<ShaderStage>,
    },
    #[serde(rename_all = "camelCase")]
    StorageBuffer {
        name: String,
        binding: u32,
        element: NodeType,
        count: Option<u32>,
        read_only: bool,
        visibility: Vec<ShaderStage>,
    },
}

impl Binding {
    pub fn binding(&self) -> u32 {
        match self {
            Binding::UniformBuffer(u) => u.binding,
            Binding::Texture { binding, .. }
            | Binding::Sampler { binding, .. }
            | Binding::StorageBuffer { binding, .. } => *binding,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Binding::UniformBuffer(u) => &u.group,
            Binding::Texture { name, .. }
            | Binding::Sampler { name, .. }
            | Binding::StorageBuffer { name, .. } => name,
        }
    }

    pub fn visibility(&self) -> &[ShaderStage] {
        match self {
            Binding::UniformBuffer(u) => &u.visibility,
            Binding::Texture { visibility, .. }
            | Binding::Sampler { visibility, .. }
            | Binding::StorageBuffer { visibility, .. } => visibility,
        }
    }
}

/// Generated programs plus the resource metadata a renderer needs to bind them.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBuilderState {
    pub(crate) dialect: Dialect,
    pub(crate) vertex: Option<String>,
    pub(crate) fragment: Option<String>,
    pub(crate) compute: Option<String>,
    pub(crate) attributes: Vec<NodeAttribute>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) uniforms: Vec<NodeUniform>,
    pub(crate) varyings: Vec<NodeVarying>,
    pub(crate) codes: Vec<NodeCode>,
    pub(crate) update_nodes: Vec<UpdateRecord>,
    pub(crate) update_before_nodes: Vec<UpdateRecord>,
}

impl NodeBuilderState {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn vertex_shader(&self) -> Option<&str> {
        self.vertex.as_deref()
    }

    pub fn fragment_shader(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn compute_shader(&self) -> Option<&str> {
        self.compute.as_deref()
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<&str> {
        match stage {
            ShaderStage::Vertex => self.vertex_shader(),
            ShaderStage::Fragment => self.fragment_shader(),
            ShaderStage::Compute => self.compute_shader(),
        }
    }

    pub fn node_attributes(&self) -> &[NodeAttribute] {
        &self.attributes
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn uniforms(&self) -> &[NodeUniform] {
        &self.uniforms
    }

    pub fn varyings(&self) -> &[NodeVarying] {
        &self.varyings
    }

    pub fn codes(&self) -> &[NodeCode] {
        &self.codes
    }

    pub fn update_nodes(&self) -> &[UpdateRecord] {
        &self.update_nodes
    }

    pub fn update_before_nodes(&self) -> &[UpdateRecord] {
        &self.update_before_nodes
    }

    pub fn uniform_buffer(&self, group: &str) -> Option<&UniformBufferBinding> {
        self.bindings.iter().find_map(|b| match b {
            Binding::UniformBuffer(u) if u.group == group => Some(u),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_offsets() {
        let (members, size) = std140_layout(&[
            ("time".to_string(), NodeType::Float, vec![]),
            ("color".to_string(), NodeType::Vec3, vec![]),
            ("scale".to_string(), NodeType::Float, vec![]),
            ("offset".to_string(), NodeType::Vec2, vec![]),
            ("model".to_string(), NodeType::Mat3, vec![]),
        ]);
        let offsets: Vec<u32> = members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28, 32, 48]);
        assert_eq!(size, 96);
    }

    #[test]
    fn test_pack_defaults() {
        let (members, size) = std140_layout(&[
            ("count".to_string(), NodeType::Int, vec![3.0]),
            ("tint".to_string(), NodeType::Vec3, vec![0.5]),
            ("basis".to_string(), NodeType::Mat2, vec![2.0]),
        ]);
        let buf = UniformBufferBinding {
            group: "object".to_string(),
            block: "ObjectUniforms".to_string(),
            binding: 0,
            cadence: UpdateType::Object,
            size,
            members,
            visibility: vec![ShaderStage::Fragment],
        };
        let bytes = buf.pack_defaults();
        assert_eq!(bytes.len(), 64);
        let int: i32 = bytemuck::pod_read_unaligned(&bytes[0..4]);
        assert_eq!(int, 3);
        let tint: [f32; 3] = bytemuck::pod_read_unaligned(&bytes[16..28]);
        assert_eq!(tint, [0.5, 0.5, 0.5]);
        let col0: [f32; 2] = bytemuck::pod_read_unaligned(&bytes[32..40]);
        let col1: [f32; 2] = bytemuck::pod_read_unaligned(&bytes[48..56]);
        assert_eq!(col0, [2.0, 0.0]);
        assert_eq!(col1, [0.0, 2.0]);
    }
}
