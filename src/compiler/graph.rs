//! Node graph arena and the authoring API used to compose shader graphs.
//!
//! Nodes live in a [`NodeGraph`] and are addressed by [`NodeId`]. Every node is one
//! [`NodeKind`] variant; the [`CustomNode`] trait is the open extension point for nodes
//! that only exist to expand themselves into other nodes during setup.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::error::BuildResult;
use super::types::{Dialect, Interpolation, NodeType, Sampling, ShaderStage, UpdateType};

static NEXT_GRAPH_UID: AtomicU64 = AtomicU64::new(1);

/// Index of a node inside its [`NodeGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a native function registered on a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Rem => "%",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            And => "&&",
            Or => "||",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            Shl => "<<",
            Shr => ">>",
        }
    }

    /// Parse an operator symbol or name (`"+"`, `"add"`, `"lessThan"`, ...).
    pub fn parse(s: &str) -> Option<BinaryOp> {
        use BinaryOp::*;
        let op = match s.trim() {
            "+" | "add" => Add,
            "-" | "sub" => Sub,
            "*" | "mul" => Mul,
            "/" | "div" => Div,
            "%" | "rem" | "mod" => Rem,
            "==" | "equal" => Eq,
            "!=" | "notEqual" => Ne,
            "<" | "lessThan" => Lt,
            "<=" | "lessThanEqual" => Le,
            ">" | "greaterThan" => Gt,
            ">=" | "greaterThanEqual" => Ge,
            "&&" | "and" => And,
            "||" | "or" => Or,
            "&" | "bitAnd" => BitAnd,
            "|" | "bitOr" => BitOr,
            "^" | "bitXor" => BitXor,
            "<<" | "shiftLeft" => Shl,
            ">>" | "shiftRight" => Shr,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// Built-in math functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MathMethod {
    Abs,
    Sign,
    Floor,
    Ceil,
    Fract,
    Sqrt,
    InverseSqrt,
    Exp,
    Exp2,
    Log,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Normalize,
    Saturate,
    Dfdx,
    Dfdy,
    Length,
    Dot,
    Distance,
    Cross,
    Min,
    Max,
    Pow,
    Step,
    Atan2,
    Reflect,
    Mix,
    Clamp,
    Smoothstep,
}

impl MathMethod {
    pub fn parse(s: &str) -> Option<MathMethod> {
        use MathMethod::*;
        let m = match s.trim() {
            "abs" => Abs,
            "sign" => Sign,
            "floor" => Floor,
            "ceil" => Ceil,
            "fract" => Fract,
            "sqrt" => Sqrt,
            "inverseSqrt" | "inversesqrt" => InverseSqrt,
            "exp" => Exp,
            "exp2" => Exp2,
            "log" => Log,
            "log2" => Log2,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "normalize" => Normalize,
            "saturate" => Saturate,
            "dFdx" | "dpdx" | "dfdx" => Dfdx,
            "dFdy" | "dpdy" | "dfdy" => Dfdy,
            "length" => Length,
            "dot" => Dot,
            "distance" => Distance,
            "cross" => Cross,
            "min" => Min,
            "max" => Max,
            "pow" => Pow,
            "step" => Step,
            "atan2" => Atan2,
            "reflect" => Reflect,
            "mix" => Mix,
            "clamp" => Clamp,
            "smoothstep" => Smoothstep,
            _ => return None,
        };
        Some(m)
    }

    /// Number of arguments the method takes.
    pub fn arity(self) -> usize {
        use MathMethod::*;
        match self {
            Length | Abs | Sign | Floor | Ceil | Fract | Sqrt | InverseSqrt | Exp | Exp2 | Log
            | Log2 | Sin | Cos | Tan | Asin | Acos | Atan | Normalize | Saturate | Dfdx | Dfdy => 1,
            Dot | Distance | Cross | Min | Max | Pow | Step | Atan2 | Reflect => 2,
            Mix | Clamp | Smoothstep => 3,
        }
    }
}

/// Built-in shader inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuiltinValue {
    VertexIndex,
    InstanceIndex,
    FragCoord,
    FrontFacing,
    GlobalInvocationId,
    LocalInvocationId,
    WorkgroupId,
}

impl BuiltinValue {
    pub fn parse(s: &str) -> Option<BuiltinValue> {
        use BuiltinValue::*;
        let v = match s.trim() {
            "vertexIndex" | "vertex_index" => VertexIndex,
            "instanceIndex" | "instance_index" => InstanceIndex,
            "fragCoord" | "frag_coord" | "position" => FragCoord,
            "frontFacing" | "front_facing" => FrontFacing,
            "globalId" | "global_invocation_id" => GlobalInvocationId,
            "localId" | "local_invocation_id" => LocalInvocationId,
            "workgroupId" | "workgroup_id" => WorkgroupId,
            _ => return None,
        };
        Some(v)
    }

    pub fn node_type(self) -> NodeType {
        match self {
            BuiltinValue::VertexIndex | BuiltinValue::InstanceIndex => NodeType::Uint,
            BuiltinValue::FragCoord => NodeType::Vec4,
            BuiltinValue::FrontFacing => NodeType::Bool,
            BuiltinValue::GlobalInvocationId
            | BuiltinValue::LocalInvocationId
            | BuiltinValue::WorkgroupId => NodeType::UVec3,
        }
    }

    pub fn stage(self) -> ShaderStage {
        match self {
            BuiltinValue::VertexIndex | BuiltinValue::InstanceIndex => ShaderStage::Vertex,
            BuiltinValue::FragCoord | BuiltinValue::FrontFacing => ShaderStage::Fragment,
            BuiltinValue::GlobalInvocationId
            | BuiltinValue::LocalInvocationId
            | BuiltinValue::WorkgroupId => ShaderStage::Compute,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageAccess {
    Read,
    #[default]
    ReadWrite,
}

/// One member of a struct layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: String,
    pub ty: NodeType,
}

impl StructMember {
    pub fn new(name: impl Into<String>, ty: NodeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Start or end of a loop range.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopBound {
    Value(f64),
    Node(NodeId),
}

/// Configuration of one loop level.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopParam {
    pub start: LoopBound,
    pub end: LoopBound,
    pub step: f64,
    /// Comparison against `end`; derived from the bounds when absent.
    pub condition: Option<BinaryOp>,
    pub ty: NodeType,
    pub name: Option<String>,
}

impl LoopParam {
    /// `for (int i = 0; i < count; i++)`.
    pub fn count(count: i64) -> Self {
        Self::range(0, count)
    }

    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start: LoopBound::Value(start as f64),
            end: LoopBound::Value(end as f64),
            step: 1.0,
            condition: None,
            ty: NodeType::Int,
            name: None,
        }
    }

    /// Loop up to a node-provided end value.
    pub fn until(end: NodeId) -> Self {
        Self {
            start: LoopBound::Value(0.0),
            end: LoopBound::Node(end),
            step: 1.0,
            condition: None,
            ty: NodeType::Int,
            name: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn with_condition(mut self, op: BinaryOp) -> Self {
        self.condition = Some(op);
        self
    }

    pub fn with_type(mut self, ty: NodeType) -> Self {
        self.ty = ty;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Condition actually used: explicit, or `>` for constant descending ranges, else `<`.
    pub fn resolved_condition(&self) -> BinaryOp {
        if let Some(op) = self.condition {
            return op;
        }
        match (&self.start, &self.end) {
            (LoopBound::Value(s), LoopBound::Value(e)) if s > e => BinaryOp::Gt,
            _ => BinaryOp::Lt,
        }
    }
}

/// Open extension point: a node that expands itself into other nodes during setup.
///
/// `setup` runs on the builder's private copy of the graph, so it may add nodes freely.
pub trait CustomNode: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn setup(&self, graph: &mut NodeGraph) -> BuildResult<NodeId>;

    fn update_type(&self) -> UpdateType {
        UpdateType::None
    }

    fn update_before_type(&self) -> UpdateType {
        UpdateType::None
    }
}

/// Native shader function source registered on a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeFunction {
    pub source: String,
    pub dialect: Dialect,
    pub includes: Vec<FunctionId>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Const {
        ty: NodeType,
        values: Vec<f64>,
    },
    Uniform {
        name: String,
        ty: NodeType,
        group: Option<String>,
        update: UpdateType,
        value: Vec<f32>,
    },
    Attribute {
        name: String,
        ty: Option<NodeType>,
    },
    Varying {
        node: NodeId,
        name: Option<String>,
        interpolation: Interpolation,
        sampling: Option<Sampling>,
    },
    Property {
        name: String,
        ty: NodeType,
    },
    Builtin(BuiltinValue),
    Texture {
        name: String,
        uv: NodeId,
        level: Option<NodeId>,
    },
    StorageBuffer {
        name: String,
        element: NodeType,
        count: Option<u32>,
        access: StorageAccess,
    },
    Var {
        node: NodeId,
        name: Option<String>,
        read_only: bool,
    },
    Assign {
        target: NodeId,
        value: NodeId,
        op: Option<BinaryOp>,
    },
    Operator {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        op: UnaryOp,
        node: NodeId,
    },
    Math {
        method: MathMethod,
        args: Vec<NodeId>,
    },
    Split {
        node: NodeId,
        components: String,
    },
    Join {
        nodes: Vec<NodeId>,
        ty: Option<NodeType>,
    },
    Convert {
        node: NodeId,
        to: NodeType,
    },
    /// With an else branch this is a value-producing select; without one it is a `void` statement.
    Conditional {
        cond: NodeId,
        if_node: NodeId,
        else_node: Option<NodeId>,
    },
    Loop {
        params: Vec<LoopParam>,
        body: Option<NodeId>,
    },
    LoopIndex {
        loop_node: NodeId,
        param: usize,
    },
    Break,
    Continue,
    Stack {
        nodes: Vec<NodeId>,
        output: Option<NodeId>,
    },
    StructType {
        name: String,
        members: Vec<StructMember>,
    },
    Struct {
        layout: NodeId,
        values: Vec<NodeId>,
    },
    Array {
        element: NodeType,
        values: Vec<NodeId>,
    },
    Member {
        node: NodeId,
        name: String,
    },
    Index {
        node: NodeId,
        index: NodeId,
    },
    Context {
        node: NodeId,
        values: Vec<(String, NodeId)>,
    },
    ContextValue {
        key: String,
        fallback: Option<NodeId>,
    },
    Cache {
        node: NodeId,
        parent: bool,
    },
    FunctionCall {
        function: FunctionId,
        args: Vec<NodeId>,
    },
    Remap {
        node: NodeId,
        in_low: NodeId,
        in_high: NodeId,
        out_low: NodeId,
        out_high: NodeId,
    },
    Custom(Arc<dyn CustomNode>),
}

impl NodeKind {
    /// Short kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Const { .. } => "Const",
            NodeKind::Uniform { .. } => "Uniform",
            NodeKind::Attribute { .. } => "Attribute",
            NodeKind::Varying { .. } => "Varying",
            NodeKind::Property { .. } => "Property",
            NodeKind::Builtin(_) => "Builtin",
            NodeKind::Texture { .. } => "Texture",
            NodeKind::StorageBuffer { .. } => "StorageBuffer",
            NodeKind::Var { .. } => "Var",
            NodeKind::Assign { .. } => "Assign",
            NodeKind::Operator { .. } => "Operator",
            NodeKind::Unary { .. } => "Unary",
            NodeKind::Math { .. } => "Math",
            NodeKind::Split { .. } => "Split",
            NodeKind::Join { .. } => "Join",
            NodeKind::Convert { .. } => "Convert",
            NodeKind::Conditional { .. } => "Conditional",
            NodeKind::Loop { .. } => "Loop",
            NodeKind::LoopIndex { .. } => "LoopIndex",
            NodeKind::Break => "Break",
            NodeKind::Continue => "Continue",
            NodeKind::Stack { .. } => "Stack",
            NodeKind::StructType { .. } => "StructType",
            NodeKind::Struct { .. } => "Struct",
            NodeKind::Array { .. } => "Array",
            NodeKind::Member { .. } => "Member",
            NodeKind::Index { .. } => "Index",
            NodeKind::Context { .. } => "Context",
            NodeKind::ContextValue { .. } => "ContextValue",
            NodeKind::Cache { .. } => "Cache",
            NodeKind::FunctionCall { .. } => "FunctionCall",
            NodeKind::Remap { .. } => "Remap",
            NodeKind::Custom(_) => "Custom",
        }
    }

    /// Every node id this node refers to, in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Const { .. }
            | NodeKind::Uniform { .. }
            | NodeKind::Attribute { .. }
            | NodeKind::Property { .. }
            | NodeKind::Builtin(_)
            | NodeKind::StorageBuffer { .. }
            | NodeKind::LoopIndex { .. }
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::StructType { .. }
            | NodeKind::Custom(_) => Vec::new(),
            NodeKind::Varying { node, .. }
            | NodeKind::Var { node, .. }
            | NodeKind::Unary { node, .. }
            | NodeKind::Split { node, .. }
            | NodeKind::Convert { node, .. }
            | NodeKind::Member { node, .. }
            | NodeKind::Cache { node, .. } => vec![*node],
            NodeKind::Texture { uv, level, .. } => {
                let mut out = vec![*uv];
                out.extend(level.iter().copied());
                out
            }
            NodeKind::Assign { target, value, .. } => vec![*target, *value],
            NodeKind::Operator { left, right, .. } => vec![*left, *right],
            NodeKind::Math { args, .. } => args.clone(),
            NodeKind::Join { nodes, .. } => nodes.clone(),
            NodeKind::Conditional {
                cond,
                if_node,
                else_node,
            } => {
                let mut out = vec![*cond, *if_node];
                out.extend(else_node.iter().copied());
                out
            }
            NodeKind::Loop { params, body } => {
                let mut out = Vec::new();
                for p in params {
                    if let LoopBound::Node(n) = p.start {
                        out.push(n);
                    }
                    if let LoopBound::Node(n) = p.end {
                        out.push(n);
                    }
                }
                out.extend(body.iter().copied());
                out
            }
            NodeKind::Stack { nodes, output } => {
                let mut out = nodes.clone();
                out.extend(output.iter().copied());
                out
            }
            NodeKind::Struct { layout, values } => {
                let mut out = vec![*layout];
                out.extend(values.iter().copied());
                out
            }
            NodeKind::Array { values, .. } => values.clone(),
            NodeKind::Index { node, index } => vec![*node, *index],
            NodeKind::Context { node, values } => {
                let mut out = vec![*node];
                out.extend(values.iter().map(|(_, v)| *v));
                out
            }
            NodeKind::ContextValue { fallback, .. } => fallback.iter().copied().collect(),
            NodeKind::FunctionCall { args, .. } => args.clone(),
            NodeKind::Remap {
                node,
                in_low,
                in_high,
                out_low,
                out_high,
            } => vec![*node, *in_low, *in_high, *out_low, *out_high],
        }
    }

    /// Nodes that rewrite themselves into a sub-graph during setup.
    pub fn is_expandable(&self) -> bool {
        matches!(self, NodeKind::Remap { .. } | NodeKind::Custom(_))
    }

    /// Nodes whose result is materialized into a variable when referenced more than once.
    pub fn is_temp(&self) -> bool {
        matches!(
            self,
            NodeKind::Operator { .. }
                | NodeKind::Unary { .. }
                | NodeKind::Math { .. }
                | NodeKind::Join { .. }
                | NodeKind::Convert { .. }
                | NodeKind::Conditional { .. }
                | NodeKind::Texture { .. }
                | NodeKind::Struct { .. }
                | NodeKind::Array { .. }
                | NodeKind::FunctionCall { .. }
        )
    }

    /// Short label for diagnostics (names of named nodes).
    fn label(&self) -> Option<String> {
        match self {
            NodeKind::Uniform { name, .. }
            | NodeKind::Attribute { name, .. }
            | NodeKind::Property { name, .. }
            | NodeKind::Texture { name, .. }
            | NodeKind::StorageBuffer { name, .. }
            | NodeKind::StructType { name, .. }
            | NodeKind::Member { name, .. } => Some(name.clone()),
            NodeKind::Var { name, .. } | NodeKind::Varying { name, .. } => name.clone(),
            NodeKind::Split { components, .. } => Some(components.clone()),
            NodeKind::Operator { op, .. } => Some(op.symbol().to_string()),
            NodeKind::Math { method, .. } => Some(format!("{method:?}").to_ascii_lowercase()),
            NodeKind::ContextValue { key, .. } => Some(key.clone()),
            NodeKind::Custom(custom) => Some(custom.type_name().to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct NodeEntry {
    kind: NodeKind,
    label: Option<String>,
}

/// Arena holding a shader node graph.
///
/// Cloning a graph produces a new, instance-distinct graph with its own uid.
#[derive(Debug)]
pub struct NodeGraph {
    uid: u64,
    version: u64,
    nodes: Vec<NodeEntry>,
    functions: Vec<NativeFunction>,
    default_uv: Option<NodeId>,
}

impl Default for NodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for NodeGraph {
    fn clone(&self) -> Self {
        let mut copy = self.fork();
        copy.uid = NEXT_GRAPH_UID.fetch_add(1, Ordering::Relaxed);
        copy
    }
}

impl NodeGraph {
    pub fn new() -> Self {
        Self {
            uid: NEXT_GRAPH_UID.fetch_add(1, Ordering::Relaxed),
            version: 0,
            nodes: Vec::new(),
            functions: Vec::new(),
            default_uv: None,
        }
    }

    /// Copy that keeps the uid; used for a build's private working graph.
    pub(crate) fn fork(&self) -> Self {
        Self {
            uid: self.uid,
            version: self.version,
            nodes: self.nodes.clone(),
            functions: self.functions.clone(),
            default_uv: self.default_uv,
        }
    }

    /// Process-unique identity of this graph instance.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.index()).map(|e| &e.kind)
    }

    pub fn label(&self, id: NodeId) -> Option<String> {
        let entry = self.nodes.get(id.index())?;
        entry.label.clone().or_else(|| entry.kind.label())
    }

    /// Attach a diagnostic label (e.g. a graph document node id).
    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.label = Some(label.into());
        }
    }

    pub fn function(&self, id: FunctionId) -> Option<&NativeFunction> {
        self.functions.get(id.index())
    }

    pub fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeEntry { kind, label: None });
        self.version += 1;
        id
    }

    /// Replace a node in place. Ids referring to it keep pointing at the new kind.
    pub fn replace(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.kind = kind;
            self.version += 1;
        }
    }

    // --- leaves -------------------------------------------------------------------------------

    pub fn constant(&mut self, ty: NodeType, values: &[f64]) -> NodeId {
        self.push(NodeKind::Const {
            ty,
            values: values.to_vec(),
        })
    }

    pub fn float(&mut self, v: f64) -> NodeId {
        self.constant(NodeType::Float, &[v])
    }

    pub fn int(&mut self, v: i64) -> NodeId {
        self.constant(NodeType::Int, &[v as f64])
    }

    pub fn uint(&mut self, v: u64) -> NodeId {
        self.constant(NodeType::Uint, &[v as f64])
    }

    pub fn boolean(&mut self, v: bool) -> NodeId {
        self.constant(NodeType::Bool, &[if v { 1.0 } else { 0.0 }])
    }

    pub fn vec2(&mut self, x: f64, y: f64) -> NodeId {
        self.constant(NodeType::Vec2, &[x, y])
    }

    pub fn vec3(&mut self, x: f64, y: f64, z: f64) -> NodeId {
        self.constant(NodeType::Vec3, &[x, y, z])
    }

    pub fn vec4(&mut self, x: f64, y: f64, z: f64, w: f64) -> NodeId {
        self.constant(NodeType::Vec4, &[x, y, z, w])
    }

    /// Uniform in the default group for its (initially `NONE`) update cadence.
    pub fn uniform(&mut self, name: impl Into<String>, ty: NodeType) -> NodeId {
        self.push(NodeKind::Uniform {
            name: name.into(),
            ty,
            group: None,
            update: UpdateType::None,
            value: Vec::new(),
        })
    }

    /// Fully specified uniform.
    pub fn uniform_with(
        &mut self,
        name: impl Into<String>,
        ty: NodeType,
        group: Option<&str>,
        update: UpdateType,
        value: &[f32],
    ) -> NodeId {
        self.push(NodeKind::Uniform {
            name: name.into(),
            ty,
            group: group.map(str::to_string),
            update,
            value: value.to_vec(),
        })
    }

    pub fn attribute(&mut self, name: impl Into<String>, ty: Option<NodeType>) -> NodeId {
        self.push(NodeKind::Attribute {
            name: name.into(),
            ty,
        })
    }

    pub fn varying(&mut self, node: NodeId, name: Option<&str>) -> NodeId {
        self.push(NodeKind::Varying {
            node,
            name: name.map(str::to_string),
            interpolation: Interpolation::Perspective,
            sampling: None,
        })
    }

    pub fn varying_with(
        &mut self,
        node: NodeId,
        name: Option<&str>,
        interpolation: Interpolation,
        sampling: Option<Sampling>,
    ) -> NodeId {
        self.push(NodeKind::Varying {
            node,
            name: name.map(str::to_string),
            interpolation,
            sampling,
        })
    }

    pub fn property(&mut self, name: impl Into<String>, ty: NodeType) -> NodeId {
        self.push(NodeKind::Property {
            name: name.into(),
            ty,
        })
    }

    pub fn builtin(&mut self, value: BuiltinValue) -> NodeId {
        self.push(NodeKind::Builtin(value))
    }

    /// Shared `varying(attribute("uv"))`, the fallback for texture coordinates.
    pub fn default_uv(&mut self) -> NodeId {
        if let Some(id) = self.default_uv {
            return id;
        }
        let attr = self.attribute("uv", Some(NodeType::Vec2));
        let id = self.varying(attr, Some("uv"));
        self.default_uv = Some(id);
        id
    }

    /// Texture sample. Without an explicit `uv`, the `uv` context value is used, falling
    /// back to the mesh `uv` attribute carried through a varying.
    pub fn texture(&mut self, name: impl Into<String>, uv: Option<NodeId>) -> NodeId {
        let uv = match uv {
            Some(uv) => uv,
            None => {
                let fallback = self.default_uv();
                self.context_value("uv", Some(fallback))
            }
        };
        self.push(NodeKind::Texture {
            name: name.into(),
            uv,
            level: None,
        })
    }

    pub fn texture_level(&mut self, name: impl Into<String>, uv: NodeId, level: NodeId) -> NodeId {
        self.push(NodeKind::Texture {
            name: name.into(),
            uv,
            level: Some(level),
        })
    }

    pub fn storage_buffer(
        &mut self,
        name: impl Into<String>,
        element: NodeType,
        count: Option<u32>,
        access: StorageAccess,
    ) -> NodeId {
        self.push(NodeKind::StorageBuffer {
            name: name.into(),
            element,
            count,
            access,
        })
    }

    // --- variables ----------------------------------------------------------------------------

    pub fn to_var(&mut self, node: NodeId, name: Option<&str>) -> NodeId {
        self.push(NodeKind::Var {
            node,
            name: name.map(str::to_string),
            read_only: false,
        })
    }

    pub fn to_const(&mut self, node: NodeId, name: Option<&str>) -> NodeId {
        self.push(NodeKind::Var {
            node,
            name: name.map(str::to_string),
            read_only: true,
        })
    }

    pub fn assign(&mut self, target: NodeId, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign {
            target,
            value,
            op: None,
        })
    }

    /// Compound assignment such as `target += value`.
    pub fn assign_op(&mut self, target: NodeId, op: BinaryOp, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign {
            target,
            value,
            op: Some(op),
        })
    }

    // --- expressions --------------------------------------------------------------------------

    pub fn op(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(NodeKind::Operator { op, left, right })
    }

    pub fn add(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Add, left, right)
    }

    pub fn sub(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Sub, left, right)
    }

    pub fn mul(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Mul, left, right)
    }

    pub fn div(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Div, left, right)
    }

    pub fn less_than(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Lt, left, right)
    }

    pub fn greater_than(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Gt, left, right)
    }

    pub fn equal(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.op(BinaryOp::Eq, left, right)
    }

    pub fn unary(&mut self, op: UnaryOp, node: NodeId) -> NodeId {
        self.push(NodeKind::Unary { op, node })
    }

    pub fn negate(&mut self, node: NodeId) -> NodeId {
        self.unary(UnaryOp::Neg, node)
    }

    pub fn math(&mut self, method: MathMethod, args: &[NodeId]) -> NodeId {
        self.push(NodeKind::Math {
            method,
            args: args.to_vec(),
        })
    }

    pub fn sin(&mut self, node: NodeId) -> NodeId {
        self.math(MathMethod::Sin, &[node])
    }

    pub fn cos(&mut self, node: NodeId) -> NodeId {
        self.math(MathMethod::Cos, &[node])
    }

    pub fn split(&mut self, node: NodeId, components: &str) -> NodeId {
        self.push(NodeKind::Split {
            node,
            components: components.to_string(),
        })
    }

    pub fn join(&mut self, nodes: &[NodeId]) -> NodeId {
        self.push(NodeKind::Join {
            nodes: nodes.to_vec(),
            ty: None,
        })
    }

    pub fn join_as(&mut self, ty: NodeType, nodes: &[NodeId]) -> NodeId {
        self.push(NodeKind::Join {
            nodes: nodes.to_vec(),
            ty: Some(ty),
        })
    }

    pub fn convert(&mut self, node: NodeId, to: NodeType) -> NodeId {
        self.push(NodeKind::Convert { node, to })
    }

    pub fn remap(
        &mut self,
        node: NodeId,
        in_low: NodeId,
        in_high: NodeId,
        out_low: NodeId,
        out_high: NodeId,
    ) -> NodeId {
        self.push(NodeKind::Remap {
            node,
            in_low,
            in_high,
            out_low,
            out_high,
        })
    }

    // --- control flow -------------------------------------------------------------------------

    pub fn select(&mut self, cond: NodeId, if_node: NodeId, else_node: NodeId) -> NodeId {
        self.push(NodeKind::Conditional {
            cond,
            if_node,
            else_node: Some(else_node),
        })
    }

    pub fn if_then(&mut self, cond: NodeId, then_node: NodeId) -> NodeId {
        self.push(NodeKind::Conditional {
            cond,
            if_node: then_node,
            else_node: None,
        })
    }

    /// Build a loop. `body` receives one loop-index node per param and returns the body node.
    pub fn loop_<F>(&mut self, params: Vec<LoopParam>, body: F) -> NodeId
    where
        F: FnOnce(&mut NodeGraph, &[NodeId]) -> NodeId,
    {
        let count = params.len();
        let loop_node = self.push(NodeKind::Loop { params, body: None });
        let indices: Vec<NodeId> = (0..count)
            .map(|param| self.push(NodeKind::LoopIndex { loop_node, param }))
            .collect();
        let body_node = body(self, &indices);
        if let Some(entry) = self.nodes.get_mut(loop_node.index()) {
            if let NodeKind::Loop { body, .. } = &mut entry.kind {
                *body = Some(body_node);
            }
        }
        loop_node
    }

    pub fn brk(&mut self) -> NodeId {
        self.push(NodeKind::Break)
    }

    pub fn cont(&mut self) -> NodeId {
        self.push(NodeKind::Continue)
    }

    pub fn stack(&mut self, nodes: &[NodeId], output: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Stack {
            nodes: nodes.to_vec(),
            output,
        })
    }

    // --- aggregates ---------------------------------------------------------------------------

    pub fn struct_type(&mut self, name: impl Into<String>, members: Vec<StructMember>) -> NodeId {
        self.push(NodeKind::StructType {
            name: name.into(),
            members,
        })
    }

    pub fn struct_new(&mut self, layout: NodeId, values: &[NodeId]) -> NodeId {
        self.push(NodeKind::Struct {
            layout,
            values: values.to_vec(),
        })
    }

    pub fn array(&mut self, element: NodeType, values: &[NodeId]) -> NodeId {
        self.push(NodeKind::Array {
            element,
            values: values.to_vec(),
        })
    }

    pub fn member(&mut self, node: NodeId, name: impl Into<String>) -> NodeId {
        self.push(NodeKind::Member {
            node,
            name: name.into(),
        })
    }

    pub fn index(&mut self, node: NodeId, index: NodeId) -> NodeId {
        self.push(NodeKind::Index { node, index })
    }

    // --- scopes -------------------------------------------------------------------------------

    pub fn context(&mut self, node: NodeId, values: &[(&str, NodeId)]) -> NodeId {
        self.push(NodeKind::Context {
            node,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        })
    }

    pub fn context_value(&mut self, key: impl Into<String>, fallback: Option<NodeId>) -> NodeId {
        self.push(NodeKind::ContextValue {
            key: key.into(),
            fallback,
        })
    }

    pub fn cache(&mut self, node: NodeId, parent: bool) -> NodeId {
        self.push(NodeKind::Cache { node, parent })
    }

    // --- native code --------------------------------------------------------------------------

    pub fn native_function(&mut self, source: impl Into<String>, dialect: Dialect) -> FunctionId {
        self.native_function_with_includes(source, dialect, &[])
    }

    pub fn native_function_with_includes(
        &mut self,
        source: impl Into<String>,
        dialect: Dialect,
        includes: &[FunctionId],
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(NativeFunction {
            source: source.into(),
            dialect,
            includes: includes.to_vec(),
        });
        self.version += 1;
        id
    }

    pub fn call(&mut self, function: FunctionId, args: &[NodeId]) -> NodeId {
        self.push(NodeKind::FunctionCall {
            function,
            args: args.to_vec(),
        })
    }

    pub fn custom(&mut self, node: Arc<dyn CustomNode>) -> NodeId {
        self.push(NodeKind::Custom(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_yields_distinct_instance() {
        let mut g = NodeGraph::new();
        g.float(1.0);
        let copy = g.clone();
        assert_ne!(g.uid(), copy.uid());
        assert_eq!(g.len(), copy.len());
        assert_eq!(g.fork().uid(), g.uid());
    }

    #[test]
    fn test_mutation_bumps_version() {
        let mut g = NodeGraph::new();
        let v0 = g.version();
        let a = g.float(1.0);
        assert!(g.version() > v0);
        let v1 = g.version();
        g.set_label(a, "one");
        assert_eq!(g.version(), v1);
        g.replace(a, NodeKind::Const {
            ty: NodeType::Float,
            values: vec![2.0],
        });
        assert!(g.version() > v1);
        assert_eq!(g.label(a).as_deref(), Some("one"));
    }

    #[test]
    fn test_loop_builder_wires_indices_and_body() {
        let mut g = NodeGraph::new();
        let lp = g.loop_(vec![LoopParam::count(4)], |g, idx| {
            assert_eq!(idx.len(), 1);
            g.stack(&[], Some(idx[0]))
        });
        match g.get(lp) {
            Some(NodeKind::Loop { body: Some(_), params }) => assert_eq!(params.len(), 1),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_descending_constant_range_counts_down() {
        assert_eq!(LoopParam::range(10, 0).resolved_condition(), BinaryOp::Gt);
        assert_eq!(LoopParam::count(3).resolved_condition(), BinaryOp::Lt);
    }

    #[test]
    fn test_texture_defaults_to_context_uv() {
        let mut g = NodeGraph::new();
        let t = g.texture("map", None);
        let uv = match g.get(t) {
            Some(NodeKind::Texture { uv, .. }) => *uv,
            _ => panic!("expected texture"),
        };
        assert!(matches!(g.get(uv), Some(NodeKind::ContextValue { key, fallback: Some(_) }) if key == "uv"));
        let again = g.texture("normalMap", None);
        let uv2 = match g.get(again) {
            Some(NodeKind::Texture { uv, .. }) => *uv,
            _ => panic!("expected texture"),
        };
        let fallback = |id: NodeId, g: &NodeGraph| match g.get(id) {
            Some(NodeKind::ContextValue { fallback, .. }) => *fallback,
            _ => None,
        };
        assert_eq!(fallback(uv, &g), fallback(uv2, &g));
    }
}
