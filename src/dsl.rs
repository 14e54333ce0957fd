//! JSON graph documents.
//!
//! A document lists nodes with their `params`, wires them with `connections`
//! (`from` output port into `to` input port), and names the root node of each stage in
//! `outputs`. Inputs that are not connected fall back to a numeric `params` entry under
//! the same port id, then to the node type's default where one exists.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compiler::graph::{BinaryOp, BuiltinValue, MathMethod, NodeGraph, NodeId};
use crate::compiler::types::{Interpolation, NodeType, ShaderStage, UpdateType};
use crate::compiler::{BuildOptions, BuildRequest};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Stage name (`vertex`, `fragment`, `compute`) to root node id.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    #[serde(default)]
    pub options: Option<BuildOptions>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metadata {
    pub name: String,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Endpoint {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "portId")]
    pub port_id: String,
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<GraphDocument> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse graph json at {}", path.display()))
}

pub fn incoming_connection<'a>(
    doc: &'a GraphDocument,
    to_node_id: &str,
    to_port_id: &str,
) -> Option<&'a Connection> {
    doc.connections
        .iter()
        .find(|c| c.to.node_id == to_node_id && c.to.port_id == to_port_id)
}

pub fn parse_f64(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<f64> {
    match params.get(key) {
        Some(v) => v
            .as_f64()
            .or_else(|| v.as_u64().map(|x| x as f64))
            .or_else(|| v.as_i64().map(|x| x as f64))
            .or_else(|| v.as_bool().map(|b| if b { 1.0 } else { 0.0 })),
        None => None,
    }
}

pub fn parse_str<'a>(params: &'a HashMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// A number or an array of numbers.
fn parse_values(params: &HashMap<String, serde_json::Value>, key: &str) -> Result<Vec<f64>> {
    match params.get(key) {
        None => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_f64()
                    .or_else(|| v.as_bool().map(|b| if b { 1.0 } else { 0.0 }))
                    .ok_or_else(|| anyhow!("`{key}` must contain only numbers, got {v}"))
            })
            .collect(),
        Some(_) => parse_f64(params, key)
            .map(|v| vec![v])
            .ok_or_else(|| anyhow!("`{key}` must be a number or an array of numbers")),
    }
}

fn parse_type(params: &HashMap<String, serde_json::Value>, key: &str) -> Result<Option<NodeType>> {
    match parse_str(params, key) {
        None => Ok(None),
        Some(name) => NodeType::from_name(name)
            .map(Some)
            .ok_or_else(|| anyhow!("unknown type `{name}`")),
    }
}

fn parse_update(params: &HashMap<String, serde_json::Value>) -> Result<UpdateType> {
    match parse_str(params, "update").map(str::to_ascii_lowercase).as_deref() {
        None | Some("none") => Ok(UpdateType::None),
        Some("frame") => Ok(UpdateType::Frame),
        Some("render") => Ok(UpdateType::Render),
        Some("object") => Ok(UpdateType::Object),
        Some(other) => bail!("unknown update cadence `{other}`"),
    }
}

fn parse_interpolation(params: &HashMap<String, serde_json::Value>) -> Result<Interpolation> {
    match params.get("interpolation") {
        None => Ok(Interpolation::default()),
        Some(v) => serde_json::from_value(v.clone()).context("invalid interpolation"),
    }
}

/// Lower a document into a graph, the stage roots named by `outputs`, and its options.
pub fn lower_document(doc: &GraphDocument) -> Result<(NodeGraph, BuildRequest, BuildOptions)> {
    let nodes_by_id: HashMap<&str, &Node> = doc.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    if nodes_by_id.len() != doc.nodes.len() {
        bail!("graph document contains duplicate node ids");
    }
    for c in &doc.connections {
        for end in [&c.from, &c.to] {
            if !nodes_by_id.contains_key(end.node_id.as_str()) {
                bail!(
                    "connection {} references missing node {}",
                    c.id,
                    end.node_id
                );
            }
        }
    }

    let mut lowering = Lowering {
        doc,
        nodes_by_id,
        graph: NodeGraph::new(),
        lowered: HashMap::new(),
        visiting: HashSet::new(),
    };
    let mut request = BuildRequest::new();
    let mut outputs: Vec<(&String, &String)> = doc.outputs.iter().collect();
    outputs.sort();
    for (stage_name, node_id) in outputs {
        let stage = match stage_name.as_str() {
            "vertex" => ShaderStage::Vertex,
            "fragment" => ShaderStage::Fragment,
            "compute" => ShaderStage::Compute,
            other => {
                warn!(output = other, "ignoring unknown output stage");
                continue;
            }
        };
        let root = lowering
            .lower(node_id)
            .with_context(|| format!("failed to lower {stage} output {node_id}"))?;
        request = match stage {
            ShaderStage::Vertex => request.vertex(root),
            ShaderStage::Fragment => request.fragment(root),
            ShaderStage::Compute => request.compute(root),
        };
    }
    if request.stages().is_empty() {
        bail!("graph document names no vertex, fragment or compute output");
    }
    debug!(nodes = lowering.graph.len(), "lowered graph document");
    let options = doc.options.clone().unwrap_or_default();
    Ok((lowering.graph, request, options))
}

struct Lowering<'a> {
    doc: &'a GraphDocument,
    nodes_by_id: HashMap<&'a str, &'a Node>,
    graph: NodeGraph,
    lowered: HashMap<String, NodeId>,
    visiting: HashSet<String>,
}

impl<'a> Lowering<'a> {
    fn lower(&mut self, node_id: &str) -> Result<NodeId> {
        if let Some(id) = self.lowered.get(node_id) {
            return Ok(*id);
        }
        let node = *self
            .nodes_by_id
            .get(node_id)
            .ok_or_else(|| anyhow!("node not found: {node_id}"))?;
        if !self.visiting.insert(node_id.to_string()) {
            bail!("cycle detected at node {node_id}");
        }
        let result = self
            .lower_node(node)
            .with_context(|| format!("node {} ({})", node.id, node.node_type));
        self.visiting.remove(node_id);
        let id = result?;
        self.graph.set_label(id, node.id.clone());
        self.lowered.insert(node_id.to_string(), id);
        Ok(id)
    }

    /// Upstream node connected to `port`, if any.
    fn input(&mut self, node: &Node, port: &str) -> Result<Option<NodeId>> {
        match incoming_connection(self.doc, &node.id, port) {
            Some(conn) => {
                let from = conn.from.node_id.clone();
                self.lower(&from).map(Some)
            }
            None => Ok(None),
        }
    }

    fn required(&mut self, node: &Node, port: &str) -> Result<NodeId> {
        self.input(node, port)?
            .ok_or_else(|| anyhow!("missing input `{port}`"))
    }

    /// Connected input, else an inline float from `params`, else `default`.
    fn input_or_param(&mut self, node: &Node, port: &str, default: Option<f64>) -> Result<NodeId> {
        if let Some(id) = self.input(node, port)? {
            return Ok(id);
        }
        match parse_f64(&node.params, port).or(default) {
            Some(v) => Ok(self.graph.float(v)),
            None => bail!("missing input `{port}`"),
        }
    }

    fn lower_node(&mut self, node: &Node) -> Result<NodeId> {
        let p = &node.params;
        let id = match node.node_type.as_str() {
            "Const" => {
                let ty = parse_type(p, "type")?.unwrap_or(NodeType::Float);
                let values = parse_values(p, "value")?;
                self.graph.constant(ty, &values)
            }
            "Uniform" => {
                let name = parse_str(p, "name").unwrap_or(&node.id).to_string();
                let ty = parse_type(p, "type")?.unwrap_or(NodeType::Float);
                let value: Vec<f32> = parse_values(p, "value")?.into_iter().map(|v| v as f32).collect();
                let update = parse_update(p)?;
                self.graph
                    .uniform_with(name, ty, parse_str(p, "group"), update, &value)
            }
            "Attribute" => {
                let name = parse_str(p, "name").ok_or_else(|| anyhow!("missing param `name`"))?;
                let ty = parse_type(p, "type")?;
                self.graph.attribute(name, ty)
            }
            "Varying" => {
                let source = self.required(node, "node")?;
                let interpolation = parse_interpolation(p)?;
                self.graph
                    .varying_with(source, parse_str(p, "name"), interpolation, None)
            }
            "Property" => {
                let name = parse_str(p, "name").ok_or_else(|| anyhow!("missing param `name`"))?;
                let ty = parse_type(p, "type")?.ok_or_else(|| anyhow!("missing param `type`"))?;
                self.graph.property(name, ty)
            }
            "Var" => {
                let source = self.required(node, "node")?;
                let read_only = p.get("readOnly").and_then(|v| v.as_bool()).unwrap_or(false);
                if read_only {
                    self.graph.to_const(source, parse_str(p, "name"))
                } else {
                    self.graph.to_var(source, parse_str(p, "name"))
                }
            }
            "Operator" => {
                let symbol = parse_str(p, "op").ok_or_else(|| anyhow!("missing param `op`"))?;
                let op = BinaryOp::parse(symbol).ok_or_else(|| anyhow!("unknown operator `{symbol}`"))?;
                let a = self.input_or_param(node, "a", None)?;
                let b = self.input_or_param(node, "b", None)?;
                self.graph.op(op, a, b)
            }
            "Math" => {
                let name = parse_str(p, "method").ok_or_else(|| anyhow!("missing param `method`"))?;
                let method = MathMethod::parse(name).ok_or_else(|| anyhow!("unknown math method `{name}`"))?;
                let args = ["a", "b", "c"][..method.arity()]
                    .iter()
                    .map(|port| self.input_or_param(node, port, None))
                    .collect::<Result<Vec<_>>>()?;
                self.graph.math(method, &args)
            }
            "Split" => {
                let source = self.required(node, "node")?;
                let components = parse_str(p, "components").ok_or_else(|| anyhow!("missing param `components`"))?;
                self.graph.split(source, components)
            }
            "Join" => {
                let mut parts = Vec::new();
                for port in ["x", "y", "z", "w"] {
                    if let Some(id) = self.input(node, port)? {
                        parts.push(id);
                    } else if let Some(v) = parse_f64(p, port) {
                        parts.push(self.graph.float(v));
                    }
                }
                if parts.is_empty() {
                    bail!("join needs at least one of x, y, z, w");
                }
                match parse_type(p, "type")? {
                    Some(ty) => self.graph.join_as(ty, &parts),
                    None => self.graph.join(&parts),
                }
            }
            "Convert" => {
                let source = self.required(node, "node")?;
                let ty = parse_type(p, "type")?.ok_or_else(|| anyhow!("missing param `type`"))?;
                self.graph.convert(source, ty)
            }
            "Select" => {
                let cond = self.required(node, "cond")?;
                let a = self.input_or_param(node, "a", None)?;
                let b = self.input_or_param(node, "b", None)?;
                self.graph.select(cond, a, b)
            }
            "Texture" => {
                let name = parse_str(p, "name").ok_or_else(|| anyhow!("missing param `name`"))?;
                let uv = self.input(node, "uv")?;
                match self.input(node, "level")? {
                    Some(level) => {
                        let uv = uv.ok_or_else(|| anyhow!("an explicit `level` needs a `uv` input"))?;
                        self.graph.texture_level(name, uv, level)
                    }
                    None => self.graph.texture(name, uv),
                }
            }
            "Builtin" => {
                let name = parse_str(p, "value").ok_or_else(|| anyhow!("missing param `value`"))?;
                let value = BuiltinValue::parse(name).ok_or_else(|| anyhow!("unknown builtin `{name}`"))?;
                self.graph.builtin(value)
            }
            "Remap" => {
                let value = self.required(node, "value")?;
                let in_low = self.input_or_param(node, "inLow", Some(0.0))?;
                let in_high = self.input_or_param(node, "inHigh", Some(1.0))?;
                let out_low = self.input_or_param(node, "outLow", Some(0.0))?;
                let out_high = self.input_or_param(node, "outHigh", Some(1.0))?;
                self.graph.remap(value, in_low, in_high, out_low, out_high)
            }
            other => bail!("unsupported node type `{other}`"),
        };
        Ok(id)
    }
}
