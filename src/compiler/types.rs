//! Core type definitions for the node compiler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::BuildError;

/// Scalar kind shared by scalars, vectors and matrices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

/// Semantic type of a node output.
///
/// Names follow the graph-authoring vocabulary (`float`, `vec3`, `ivec2`, `mat4`, ...).
/// Dialect spellings are produced by the backends in [`super::dialect`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NodeType {
    Void,
    Bool,
    Int,
    Uint,
    Float,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    UVec2,
    UVec3,
    UVec4,
    BVec2,
    BVec3,
    BVec4,
    Mat2,
    Mat3,
    Mat4,
    Texture2D,
    Struct(String),
    Array(Box<NodeType>, u32),
}

impl NodeType {
    /// Build a scalar or vector type from a scalar kind and a component count (1..=4).
    pub fn vector(kind: ScalarKind, components: u32) -> Option<NodeType> {
        use NodeType::*;
        let ty = match (kind, components) {
            (ScalarKind::Float, 1) => Float,
            (ScalarKind::Float, 2) => Vec2,
            (ScalarKind::Float, 3) => Vec3,
            (ScalarKind::Float, 4) => Vec4,
            (ScalarKind::Int, 1) => Int,
            (ScalarKind::Int, 2) => IVec2,
            (ScalarKind::Int, 3) => IVec3,
            (ScalarKind::Int, 4) => IVec4,
            (ScalarKind::Uint, 1) => Uint,
            (ScalarKind::Uint, 2) => UVec2,
            (ScalarKind::Uint, 3) => UVec3,
            (ScalarKind::Uint, 4) => UVec4,
            (ScalarKind::Bool, 1) => Bool,
            (ScalarKind::Bool, 2) => BVec2,
            (ScalarKind::Bool, 3) => BVec3,
            (ScalarKind::Bool, 4) => BVec4,
            _ => return None,
        };
        Some(ty)
    }

    /// Square float matrix with `n` columns.
    pub fn matrix(n: u32) -> Option<NodeType> {
        match n {
            2 => Some(NodeType::Mat2),
            3 => Some(NodeType::Mat3),
            4 => Some(NodeType::Mat4),
            _ => None,
        }
    }

    /// Scalar kind of a scalar, vector or matrix type.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        use NodeType::*;
        match self {
            Bool | BVec2 | BVec3 | BVec4 => Some(ScalarKind::Bool),
            Int | IVec2 | IVec3 | IVec4 => Some(ScalarKind::Int),
            Uint | UVec2 | UVec3 | UVec4 => Some(ScalarKind::Uint),
            Float | Vec2 | Vec3 | Vec4 | Mat2 | Mat3 | Mat4 => Some(ScalarKind::Float),
            _ => None,
        }
    }

    /// Number of scalar components (the "type length" used for buffer layout).
    pub fn components(&self) -> u32 {
        use NodeType::*;
        match self {
            Void | Texture2D => 0,
            Bool | Int | Uint | Float => 1,
            Vec2 | IVec2 | UVec2 | BVec2 => 2,
            Vec3 | IVec3 | UVec3 | BVec3 => 3,
            Vec4 | IVec4 | UVec4 | BVec4 | Mat2 => 4,
            Mat3 => 9,
            Mat4 => 16,
            // Struct sizes depend on the declared layout.
            Struct(_) => 0,
            Array(elem, count) => elem.components() * count,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            NodeType::Bool | NodeType::Int | NodeType::Uint | NodeType::Float
        )
    }

    pub fn is_vector(&self) -> bool {
        !self.is_scalar() && !self.is_matrix() && self.scalar_kind().is_some()
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, NodeType::Mat2 | NodeType::Mat3 | NodeType::Mat4)
    }

    /// Scalar or vector (the types that take part in component-wise arithmetic).
    pub fn is_numeric_vector_or_scalar(&self) -> bool {
        self.is_scalar() || self.is_vector()
    }

    /// Column count of a matrix type.
    pub fn matrix_columns(&self) -> Option<u32> {
        match self {
            NodeType::Mat2 => Some(2),
            NodeType::Mat3 => Some(3),
            NodeType::Mat4 => Some(4),
            _ => None,
        }
    }

    /// Type of one component / column / element when indexing.
    pub fn element_type(&self) -> Option<NodeType> {
        if let NodeType::Array(elem, _) = self {
            return Some((**elem).clone());
        }
        if let Some(cols) = self.matrix_columns() {
            return NodeType::vector(ScalarKind::Float, cols);
        }
        if self.is_vector() {
            return self.scalar_kind().and_then(|k| NodeType::vector(k, 1));
        }
        None
    }

    /// Same component count with a different scalar kind.
    pub fn with_scalar_kind(&self, kind: ScalarKind) -> Option<NodeType> {
        if self.is_matrix() {
            return (kind == ScalarKind::Float).then(|| self.clone());
        }
        NodeType::vector(kind, self.components())
    }

    /// Types that may live in a uniform buffer.
    pub fn is_host_shareable(&self) -> bool {
        match self.scalar_kind() {
            Some(ScalarKind::Bool) | None => false,
            Some(_) => true,
        }
    }

    /// Canonical authoring name.
    pub fn name(&self) -> String {
        use NodeType::*;
        let s = match self {
            Void => "void",
            Bool => "bool",
            Int => "int",
            Uint => "uint",
            Float => "float",
            Vec2 => "vec2",
            Vec3 => "vec3",
            Vec4 => "vec4",
            IVec2 => "ivec2",
            IVec3 => "ivec3",
            IVec4 => "ivec4",
            UVec2 => "uvec2",
            UVec3 => "uvec3",
            UVec4 => "uvec4",
            BVec2 => "bvec2",
            BVec3 => "bvec3",
            BVec4 => "bvec4",
            Mat2 => "mat2",
            Mat3 => "mat3",
            Mat4 => "mat4",
            Texture2D => "texture",
            Struct(name) => return name.clone(),
            Array(elem, count) => return format!("{}[{count}]", elem.name()),
        };
        s.to_string()
    }

    /// Parse an authoring type name. Accepts the common aliases used by graph documents
    /// (`f32`, `vec3f`, `color`, `vector3`, ...) and fixed-size arrays (`float[4]`).
    pub fn from_name(name: &str) -> Option<NodeType> {
        use NodeType::*;
        let t = name.trim();
        if let Some(open) = t.find('[') {
            let close = t.rfind(']')?;
            if close != t.len() - 1 || close <= open {
                return None;
            }
            let count: u32 = t[open + 1..close].trim().parse().ok()?;
            let elem = NodeType::from_name(&t[..open])?;
            return Some(Array(Box::new(elem), count));
        }
        let ty = match t.to_ascii_lowercase().as_str() {
            "void" => Void,
            "bool" | "boolean" => Bool,
            "int" | "i32" => Int,
            "uint" | "u32" => Uint,
            "float" | "f32" | "number" => Float,
            "vec2" | "vec2f" | "vector2" => Vec2,
            "vec3" | "vec3f" | "vector3" => Vec3,
            "vec4" | "vec4f" | "vector4" | "color" => Vec4,
            "ivec2" | "vec2i" => IVec2,
            "ivec3" | "vec3i" => IVec3,
            "ivec4" | "vec4i" => IVec4,
            "uvec2" | "vec2u" => UVec2,
            "uvec3" | "vec3u" => UVec3,
            "uvec4" | "vec4u" => UVec4,
            "bvec2" => BVec2,
            "bvec3" => BVec3,
            "bvec4" => BVec4,
            "mat2" | "mat2x2f" => Mat2,
            "mat3" | "mat3x3f" => Mat3,
            "mat4" | "mat4x4f" => Mat4,
            "texture" | "texture2d" | "sampler2d" => Texture2D,
            _ => return None,
        };
        Some(ty)
    }

    /// Byte alignment and size of this type inside a std140-style uniform block.
    pub fn uniform_layout(&self) -> Option<(u32, u32)> {
        if !self.is_host_shareable() {
            return None;
        }
        let layout = match self.components() {
            _ if self.is_matrix() => {
                // Each column padded to a vec4.
                let cols = self.matrix_columns().unwrap_or(4);
                (16, 16 * cols)
            }
            1 => (4, 4),
            2 => (8, 8),
            3 => (16, 12),
            _ => (16, 16),
        };
        Some(layout)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for NodeType {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::from_name(s)
            .ok_or_else(|| BuildError::type_resolution(format!("unknown node type name `{s}`")))
    }
}

impl From<NodeType> for String {
    fn from(ty: NodeType) -> String {
        ty.name()
    }
}

impl TryFrom<String> for NodeType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeType::from_name(&value).ok_or_else(|| format!("unknown node type name `{value}`"))
    }
}

/// Shader stage a build pass runs for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How often a node's backing value has to be refreshed by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    #[default]
    None,
    Frame,
    Render,
    Object,
}

impl UpdateType {
    /// Name of the uniform group used when a uniform does not pick one.
    pub fn default_group(self) -> &'static str {
        match self {
            UpdateType::None | UpdateType::Object => "object",
            UpdateType::Render => "render",
            UpdateType::Frame => "frame",
        }
    }
}

/// Target shading language surface syntax.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Glsl,
    #[default]
    Wgsl,
}

impl Dialect {
    /// File extension used when writing shaders to disk.
    pub fn extension(self) -> &'static str {
        match self {
            Dialect::Glsl => "glsl",
            Dialect::Wgsl => "wgsl",
        }
    }
}

/// Varying interpolation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Perspective,
    Linear,
    Flat,
}

/// Varying sampling location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    Center,
    Centroid,
    Sample,
}
