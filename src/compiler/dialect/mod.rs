//! Target shading language backends.
//!
//! The builder is written against [`ShaderDialect`]; each backend supplies spellings for
//! types, literals, declarations, control flow and built-ins, and assembles the final
//! per-stage program from a [`StageProgram`].

pub mod glsl;
pub mod glsl_function;
pub mod glsl_snippet;
pub mod node_function;
pub mod wgsl;
pub mod wgsl_function;

use super::error::BuildResult;
use super::graph::{BuiltinValue, MathMethod};
use super::types::{Dialect, Interpolation, NodeType, Sampling, ScalarKind, ShaderStage};

pub use glsl::GlslDialect;
pub use glsl_function::{GlslNodeFunction, GlslNodeParser};
pub use node_function::{NodeFunction, NodeFunctionInput, NodeParser, ParamQualifier};
pub use wgsl::WgslDialect;
pub use wgsl_function::{WgslNodeFunction, WgslNodeParser};

/// Mutability of a declared local.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Mutable,
    Immutable,
    /// Initialized from a compile-time constant.
    Constant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    /// `(member, type spelling)`
    pub members: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBlockDecl {
    pub block: String,
    pub instance: String,
    pub binding: u32,
    pub members: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDecl {
    pub name: String,
    pub sampler: String,
    pub texture_binding: u32,
    pub sampler_binding: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageDecl {
    pub name: String,
    pub block: String,
    pub binding: u32,
    pub element: String,
    pub count: Option<u32>,
    pub read_only: bool,
}

/// A `location`-addressed stage input or output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationDecl {
    pub name: String,
    pub location: u32,
    pub ty: String,
    pub interpolation: Interpolation,
    pub sampling: Option<Sampling>,
}

/// Everything a backend needs to print one stage.
#[derive(Clone, Debug)]
pub struct StageProgram {
    pub stage: ShaderStage,
    pub structs: Vec<StructDecl>,
    pub uniforms: Vec<UniformBlockDecl>,
    pub textures: Vec<TextureDecl>,
    pub storage: Vec<StorageDecl>,
    /// Vertex attributes (vertex stage only).
    pub attributes: Vec<LocationDecl>,
    /// Varyings written by the vertex stage or read by the fragment stage.
    pub varyings: Vec<LocationDecl>,
    pub builtins: Vec<BuiltinValue>,
    pub functions: Vec<String>,
    /// Property declarations hoisted to the top of the entry point.
    pub locals: Vec<String>,
    pub body: Vec<String>,
    /// Root expression: clip position for vertex, color for fragment.
    pub output: Option<String>,
    pub workgroup_size: [u32; 3],
}

impl StageProgram {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            structs: Vec::new(),
            uniforms: Vec::new(),
            textures: Vec::new(),
            storage: Vec::new(),
            attributes: Vec::new(),
            varyings: Vec::new(),
            builtins: Vec::new(),
            functions: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            output: None,
            workgroup_size: [64, 1, 1],
        }
    }
}

pub trait ShaderDialect: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Identifiers generated code must never declare.
    fn reserved_words(&self) -> &'static [&'static str];

    fn parser(&self) -> &'static dyn NodeParser;

    fn type_name(&self, ty: &NodeType) -> BuildResult<String>;

    fn scalar_literal(&self, kind: ScalarKind, value: f64) -> String;

    fn constructor(&self, type_name: &str, args: &[String]) -> String {
        format!("{type_name}({})", args.join(", "))
    }

    fn var_decl(&self, name: &str, type_name: &str, init: Option<&str>, kind: VarKind) -> String;

    fn uniform_ref(&self, instance: &str, member: &str) -> String;

    fn math_call(&self, method: MathMethod, args: &[String]) -> String;

    fn float_remainder(&self, a: &str, b: &str) -> String;

    fn select(&self, cond: &str, if_true: &str, if_false: &str) -> String;

    fn for_header(
        &self,
        var: &str,
        type_name: &str,
        start: &str,
        condition: &str,
        update: &str,
    ) -> String;

    fn texture_sample(&self, texture: &str, sampler: &str, uv: &str, level: Option<&str>) -> String;

    fn builtin_ref(&self, builtin: BuiltinValue) -> String;

    fn varying_ref(&self, stage: ShaderStage, name: &str) -> String;

    /// Argument spelling for an `out`/`inout` parameter.
    fn address_of(&self, lvalue: &str) -> String;

    /// Whether multi-component swizzles may be assigned to.
    fn swizzle_assignment(&self) -> bool;

    fn assemble(&self, program: &StageProgram) -> String;
}

/// Backend for a dialect.
pub fn backend(dialect: Dialect) -> &'static dyn ShaderDialect {
    match dialect {
        Dialect::Glsl => &GlslDialect,
        Dialect::Wgsl => &WgslDialect,
    }
}

/// Parser for native functions written in `dialect`.
pub fn parser_for(dialect: Dialect) -> &'static dyn NodeParser {
    backend(dialect).parser()
}

/// Shared spelling of math methods whose names agree across dialects.
pub(crate) fn common_math_name(method: MathMethod) -> &'static str {
    use MathMethod::*;
    match method {
        Abs => "abs",
        Sign => "sign",
        Floor => "floor",
        Ceil => "ceil",
        Fract => "fract",
        Sqrt => "sqrt",
        InverseSqrt => "inverseSqrt",
        Exp => "exp",
        Exp2 => "exp2",
        Log => "log",
        Log2 => "log2",
        Sin => "sin",
        Cos => "cos",
        Tan => "tan",
        Asin => "asin",
        Acos => "acos",
        Atan => "atan",
        Normalize => "normalize",
        Saturate => "saturate",
        Dfdx => "dpdx",
        Dfdy => "dpdy",
        Length => "length",
        Dot => "dot",
        Distance => "distance",
        Cross => "cross",
        Min => "min",
        Max => "max",
        Pow => "pow",
        Step => "step",
        Atan2 => "atan2",
        Reflect => "reflect",
        Mix => "mix",
        Clamp => "clamp",
        Smoothstep => "smoothstep",
    }
}

pub(crate) fn interpolation_name(i: Interpolation) -> &'static str {
    match i {
        Interpolation::Perspective => "perspective",
        Interpolation::Linear => "linear",
        Interpolation::Flat => "flat",
    }
}

pub(crate) fn sampling_name(s: Sampling) -> &'static str {
    match s {
        Sampling::Center => "center",
        Sampling::Centroid => "centroid",
        Sampling::Sample => "sample",
    }
}
