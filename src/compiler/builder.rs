//! Build orchestration.
//!
//! A build runs in four passes over a private copy of the author's graph:
//!
//! 1. **setup**: expandable nodes (`Remap`, custom nodes) are rewritten into sub-graphs
//!    until nothing reachable from the roots is left to expand.
//! 2. **analyze**: every requested stage is walked once to count how many parent edges
//!    reach each node per `(cache scope, node, stage)`, and to register uniforms,
//!    attributes, varyings and native functions.
//! 3. **generate**: stages are generated in vertex, fragment, compute order. Nodes
//!    referenced more than once are materialized into `nodeVarN` locals.
//! 4. **assemble**: each stage is printed by the dialect backend.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::cache::{BlockId, CachedSnippet, NodeCache, ScopeId};
use super::context::{ContextStack, FrameId};
use super::dialect::glsl_snippet::translate_glsl_function;
use super::dialect::{
    LocationDecl, NodeFunctionInput, ShaderDialect, StageProgram, StorageDecl, StructDecl,
    TextureDecl, UniformBlockDecl, VarKind, backend, parser_for,
};
use super::error::{BuildError, BuildResult, NodeLocation};
use super::graph::{
    BuiltinValue, FunctionId, NodeGraph, NodeId, NodeKind, StorageAccess, StructMember,
};
use super::node_compiler;
use super::state::{
    Binding, NodeAttribute, NodeBuilderState, NodeCode, NodeUniform, NodeVarying,
    UniformBufferBinding, UpdateRecord, std140_layout,
};
use super::types::{Dialect, Interpolation, NodeType, Sampling, ScalarKind, ShaderStage, UpdateType};
use super::utils::{NameAllocator, lower_camel, upper_camel};
use super::validation::{validate_glsl, validate_wgsl_module};

/// Preferred loop counter names by nesting depth. A counter holds its name only while its
/// loop is open.
pub(crate) const LOOP_NAMES: [&str; 6] = ["i", "j", "k", "l", "m", "n"];

/// Build configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOptions {
    pub dialect: Dialect,
    /// Types of mesh attributes that `Attribute` nodes may read without an explicit type.
    pub attributes: IndexMap<String, NodeType>,
    pub workgroup_size: [u32; 3],
    /// Bound on setup expansion rounds and expansion chain length.
    pub max_setup_depth: usize,
    /// Run naga over every generated stage.
    pub validate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        let mut attributes = IndexMap::new();
        attributes.insert("position".to_string(), NodeType::Vec3);
        attributes.insert("normal".to_string(), NodeType::Vec3);
        attributes.insert("uv".to_string(), NodeType::Vec2);
        Self {
            dialect: Dialect::default(),
            attributes,
            workgroup_size: [64, 1, 1],
            max_setup_depth: 64,
            validate: false,
        }
    }
}

impl BuildOptions {
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, ty: NodeType) -> Self {
        self.attributes.insert(name.into(), ty);
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

/// Root node per stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildRequest {
    pub vertex: Option<NodeId>,
    pub fragment: Option<NodeId>,
    pub compute: Option<NodeId>,
}

impl BuildRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(mut self, root: NodeId) -> Self {
        self.vertex = Some(root);
        self
    }

    pub fn fragment(mut self, root: NodeId) -> Self {
        self.fragment = Some(root);
        self
    }

    pub fn compute(mut self, root: NodeId) -> Self {
        self.compute = Some(root);
        self
    }

    pub fn root(&self, stage: ShaderStage) -> Option<NodeId> {
        match stage {
            ShaderStage::Vertex => self.vertex,
            ShaderStage::Fragment => self.fragment,
            ShaderStage::Compute => self.compute,
        }
    }

    /// Requested `(stage, root)` pairs in generation order.
    pub fn stages(&self) -> Vec<(ShaderStage, NodeId)> {
        ShaderStage::ALL
            .into_iter()
            .filter_map(|s| self.root(s).map(|r| (s, r)))
            .collect()
    }
}

#[derive(Debug)]
struct Block {
    id: BlockId,
    lines: Vec<String>,
}

/// Per-stage code generation state.
#[derive(Debug)]
struct StageBuild {
    active: bool,
    names: NameAllocator,
    temp_counter: u32,
    blocks: Vec<Block>,
    next_block: u32,
    locals: Vec<String>,
    properties: IndexMap<String, (NodeType, String)>,
    structs: IndexSet<String>,
    groups: IndexSet<String>,
    textures: IndexSet<String>,
    storage: IndexSet<String>,
    attributes: IndexSet<String>,
    varyings: IndexSet<NodeId>,
    builtins: IndexSet<BuiltinValue>,
    functions: IndexSet<FunctionId>,
    output: Option<String>,
}

impl StageBuild {
    fn new() -> Self {
        Self {
            active: false,
            names: NameAllocator::default(),
            temp_counter: 0,
            blocks: vec![Block {
                id: BlockId(0),
                lines: Vec::new(),
            }],
            next_block: 1,
            locals: Vec::new(),
            properties: IndexMap::new(),
            structs: IndexSet::new(),
            groups: IndexSet::new(),
            textures: IndexSet::new(),
            storage: IndexSet::new(),
            attributes: IndexSet::new(),
            varyings: IndexSet::new(),
            builtins: IndexSet::new(),
            functions: IndexSet::new(),
            output: None,
        }
    }
}

fn stage_index(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Fragment => 1,
        ShaderStage::Compute => 2,
    }
}

#[derive(Clone, Debug)]
pub(crate) struct UniformRecord {
    pub member: String,
    pub ty: NodeType,
    pub group: String,
    pub update: UpdateType,
    pub value: Vec<f32>,
    pub node: NodeId,
}

#[derive(Clone, Debug)]
struct GroupRecord {
    block: String,
    instance: String,
    cadence: Option<UpdateType>,
    members: Vec<(String, String)>,
    binding: Option<u32>,
}

#[derive(Clone, Debug)]
struct TextureRecord {
    name: String,
    sampler: String,
    texture_binding: Option<u32>,
    sampler_binding: Option<u32>,
}

#[derive(Clone, Debug)]
struct StorageRecord {
    name: String,
    block: String,
    element: NodeType,
    count: Option<u32>,
    access: StorageAccess,
    binding: Option<u32>,
}

#[derive(Clone, Debug)]
struct AttributeRecord {
    name: String,
    ty: NodeType,
    location: Option<u32>,
}

#[derive(Clone, Debug)]
pub(crate) struct VaryingRecord {
    pub name: String,
    pub ty: NodeType,
    pub node: NodeId,
    pub interpolation: Interpolation,
    pub sampling: Option<Sampling>,
    pub location: Option<u32>,
    pub assigned: bool,
}

/// Parsed native function ready for emission in the target dialect.
#[derive(Clone, Debug)]
pub(crate) struct FunctionRecord {
    pub name: String,
    pub inputs: Vec<NodeFunctionInput>,
    pub return_type: NodeType,
    /// Declaration in the target dialect.
    pub code: String,
    /// Declaration in the source dialect, used when lowering dependents.
    pub source_code: String,
    pub includes: Vec<FunctionId>,
}

#[derive(Clone, Debug)]
pub(crate) struct ActiveLoop {
    pub node: NodeId,
    pub param: usize,
    pub var: String,
}

/// Compiles one [`NodeGraph`] into a [`NodeBuilderState`].
pub struct NodeBuilder {
    graph: NodeGraph,
    options: BuildOptions,
    dialect: &'static dyn ShaderDialect,
    stage: ShaderStage,
    cache: NodeCache,
    scope: ScopeId,
    context: ContextStack,
    expansions: HashMap<NodeId, NodeId>,
    types: HashMap<(NodeId, FrameId), NodeType>,
    typing: HashSet<(NodeId, FrameId)>,
    analysis_path: Vec<NodeId>,
    loops: Vec<ActiveLoop>,
    globals: NameAllocator,
    stages: [StageBuild; 3],
    structs: IndexMap<String, Vec<StructMember>>,
    uniforms: IndexMap<(String, String), UniformRecord>,
    groups: IndexMap<String, GroupRecord>,
    textures: IndexMap<String, TextureRecord>,
    storage: IndexMap<String, StorageRecord>,
    attributes: IndexMap<String, AttributeRecord>,
    varyings: IndexMap<NodeId, VaryingRecord>,
    functions: IndexMap<FunctionId, FunctionRecord>,
    registering: HashSet<FunctionId>,
    next_binding: u32,
    next_attribute: u32,
    next_varying: u32,
    varying_counter: u32,
    update_nodes: IndexMap<NodeId, UpdateRecord>,
    update_before_nodes: IndexMap<NodeId, UpdateRecord>,
}

impl NodeBuilder {
    pub fn new(graph: &NodeGraph, options: BuildOptions) -> Self {
        let dialect = backend(options.dialect);
        Self {
            cache: NodeCache::new(),
            graph: graph.fork(),
            options,
            dialect,
            stage: ShaderStage::Vertex,
            scope: ScopeId::ROOT,
            context: ContextStack::new(),
            expansions: HashMap::new(),
            types: HashMap::new(),
            typing: HashSet::new(),
            analysis_path: Vec::new(),
            loops: Vec::new(),
            globals: NameAllocator::new(dialect.reserved_words().iter().copied()),
            stages: [StageBuild::new(), StageBuild::new(), StageBuild::new()],
            structs: IndexMap::new(),
            uniforms: IndexMap::new(),
            groups: IndexMap::new(),
            textures: IndexMap::new(),
            storage: IndexMap::new(),
            attributes: IndexMap::new(),
            varyings: IndexMap::new(),
            functions: IndexMap::new(),
            registering: HashSet::new(),
            next_binding: 0,
            next_attribute: 0,
            next_varying: 0,
            varying_counter: 0,
            update_nodes: IndexMap::new(),
            update_before_nodes: IndexMap::new(),
        }
    }

    pub fn build(mut self, request: &BuildRequest) -> BuildResult<NodeBuilderState> {
        let roots = request.stages();
        if roots.is_empty() {
            return Err(BuildError::graph("build request names no stage roots"));
        }
        debug!(
            graph = self.graph.uid(),
            nodes = self.graph.len(),
            dialect = ?self.options.dialect,
            stages = ?roots.iter().map(|(s, _)| s.name()).collect::<Vec<_>>(),
            "building node graph"
        );

        let root_ids: Vec<NodeId> = roots.iter().map(|(_, r)| *r).collect();
        self.expand(&root_ids)?;
        self.collect_structs()?;

        for (stage, _) in &roots {
            self.stages[stage_index(*stage)].active = true;
        }
        for (stage, root) in &roots {
            self.stage = *stage;
            self.scope = ScopeId::ROOT;
            self.analyze(*root)?;
        }
        for (stage, root) in &roots {
            self.generate_stage(*stage, *root)?;
        }
        self.assemble(&roots)
    }

    // --- setup --------------------------------------------------------------------------------

    fn expand(&mut self, roots: &[NodeId]) -> BuildResult<()> {
        let mut rounds = 0;
        loop {
            let pending = self.unexpanded(roots)?;
            if pending.is_empty() {
                if rounds > 0 {
                    debug!(rounds, nodes = self.graph.len(), "setup expansion settled");
                }
                return Ok(());
            }
            rounds += 1;
            if rounds > self.options.max_setup_depth {
                return Err(BuildError::graph(format!(
                    "setup expansion did not settle after {} rounds",
                    self.options.max_setup_depth
                )));
            }
            for id in pending {
                let target = self.with_node(id, |b| b.setup_node(id))?;
                self.expansions.insert(id, target);
            }
        }
    }

    /// Expandable nodes reachable from `roots` that have no expansion yet.
    fn unexpanded(&self, roots: &[NodeId]) -> BuildResult<Vec<NodeId>> {
        let mut pending = IndexSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let id = self.resolve(id)?;
            if !visited.insert(id) {
                continue;
            }
            let kind = self.graph.get(id).ok_or_else(|| {
                BuildError::graph(format!("node {id} does not exist in the graph"))
            })?;
            if kind.is_expandable() {
                pending.insert(id);
                continue;
            }
            stack.extend(kind.children().into_iter().rev());
        }
        Ok(pending.into_iter().collect())
    }

    fn setup_node(&mut self, id: NodeId) -> BuildResult<NodeId> {
        let target = match self.kind(id)? {
            NodeKind::Remap {
                node,
                in_low,
                in_high,
                out_low,
                out_high,
            } => node_compiler::math_nodes::setup_remap(
                &mut self.graph,
                node,
                in_low,
                in_high,
                out_low,
                out_high,
            ),
            NodeKind::Custom(custom) => {
                let label = custom.type_name().to_string();
                let graph = self.graph.uid();
                if custom.update_type() != UpdateType::None {
                    self.update_nodes.insert(
                        id,
                        UpdateRecord {
                            graph,
                            node: id,
                            label: label.clone(),
                            cadence: custom.update_type(),
                        },
                    );
                }
                if custom.update_before_type() != UpdateType::None {
                    self.update_before_nodes.insert(
                        id,
                        UpdateRecord {
                            graph,
                            node: id,
                            label: label.clone(),
                            cadence: custom.update_before_type(),
                        },
                    );
                }
                trace!(node = %id, custom = %label, "expanding custom node");
                custom.setup(&mut self.graph)?
            }
            _ => return Ok(id),
        };
        if target == id {
            return Err(BuildError::graph("setup returned the node itself"));
        }
        if self.graph.get(target).is_none() {
            return Err(BuildError::graph(format!(
                "setup returned node {target}, which does not exist"
            )));
        }
        Ok(target)
    }

    /// Follow setup expansions to the node that is actually built.
    pub(crate) fn resolve(&self, id: NodeId) -> BuildResult<NodeId> {
        let mut current = id;
        let mut steps = 0;
        while let Some(next) = self.expansions.get(&current) {
            current = *next;
            steps += 1;
            if steps > self.options.max_setup_depth {
                return Err(BuildError::graph(format!(
                    "expansion chain from node {id} exceeds the maximum setup depth"
                )));
            }
        }
        Ok(current)
    }

    fn collect_structs(&mut self) -> BuildResult<()> {
        for index in 0..self.graph.len() {
            let Some(NodeKind::StructType { name, members }) =
                self.graph.get(NodeId::from_index(index))
            else {
                continue;
            };
            match self.structs.get(name) {
                Some(existing) if existing != members => {
                    return Err(BuildError::binding_layout(format!(
                        "struct `{name}` is declared twice with different members"
                    )));
                }
                Some(_) => {}
                None => {
                    if members.is_empty() {
                        return Err(BuildError::binding_layout(format!(
                            "struct `{name}` has no members"
                        )));
                    }
                    if self.globals.is_used(name) || name.is_empty() {
                        return Err(BuildError::binding_layout(format!(
                            "struct name `{name}` collides with a reserved identifier"
                        )));
                    }
                    self.globals.reserve(name);
                    self.structs.insert(name.clone(), members.clone());
                }
            }
        }
        Ok(())
    }

    // --- node access --------------------------------------------------------------------------

    pub(crate) fn kind(&self, id: NodeId) -> BuildResult<NodeKind> {
        self.graph
            .get(id)
            .cloned()
            .ok_or_else(|| BuildError::graph(format!("node {id} does not exist in the graph")))
    }

    pub(crate) fn location(&self, id: NodeId) -> NodeLocation {
        NodeLocation {
            id,
            kind: self.graph.get(id).map_or("Missing", NodeKind::kind_name),
            label: self.graph.label(id),
        }
    }

    /// Run `f` attributing any error to node `id`.
    pub(crate) fn with_node<T>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut Self) -> BuildResult<T>,
    ) -> BuildResult<T> {
        f(self).map_err(|e| e.located(self.location(id), self.stage))
    }

    pub(crate) fn dialect(&self) -> &'static dyn ShaderDialect {
        self.dialect
    }

    pub(crate) fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub(crate) fn is_stage_active(&self, stage: ShaderStage) -> bool {
        self.stages[stage_index(stage)].active
    }

    pub(crate) fn struct_members(&self, name: &str) -> BuildResult<&[StructMember]> {
        self.structs
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| BuildError::binding_layout(format!("struct `{name}` is not declared")))
    }

    // --- scoping ------------------------------------------------------------------------------

    pub(crate) fn in_scope<T>(
        &mut self,
        scope: ScopeId,
        f: impl FnOnce(&mut Self) -> BuildResult<T>,
    ) -> BuildResult<T> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = previous;
        result
    }

    pub(crate) fn cache_scope(&mut self, cache_node: NodeId, parent: bool) -> ScopeId {
        self.cache.scope_for(self.scope, cache_node, parent)
    }

    pub(crate) fn in_context<T>(
        &mut self,
        context_node: NodeId,
        values: Vec<(String, NodeId)>,
        f: impl FnOnce(&mut Self) -> BuildResult<T>,
    ) -> BuildResult<T> {
        self.context.push(context_node, values);
        let result = f(self);
        self.context.pop();
        result
    }

    /// Resolve a context value and run `f` on it with the frames at and above the defining
    /// frame hidden, so the value sees the context it was declared in.
    pub(crate) fn with_context_value<T>(
        &mut self,
        key: &str,
        fallback: Option<NodeId>,
        f: impl FnOnce(&mut Self, NodeId) -> BuildResult<T>,
    ) -> BuildResult<T> {
        match self.context.lookup(key) {
            Some(hit) => {
                let saved = self.context.truncate(hit.depth);
                let result = f(self, hit.node);
                self.context.restore(saved);
                result
            }
            None => match fallback {
                Some(node) => f(self, node),
                None => Err(BuildError::scope(format!(
                    "context value `{key}` is not provided and has no fallback"
                ))),
            },
        }
    }

    pub(crate) fn in_stage<T>(
        &mut self,
        stage: ShaderStage,
        f: impl FnOnce(&mut Self) -> BuildResult<T>,
    ) -> BuildResult<T> {
        if stage == self.stage {
            return f(self);
        }
        let previous = std::mem::replace(&mut self.stage, stage);
        let loops = std::mem::take(&mut self.loops);
        let result = f(self);
        self.stage = previous;
        self.loops = loops;
        result
    }

    // --- loops --------------------------------------------------------------------------------

    pub(crate) fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    pub(crate) fn push_loop(&mut self, active: ActiveLoop) {
        self.loops.push(active);
    }

    pub(crate) fn pop_loop(&mut self) {
        self.loops.pop();
    }

    pub(crate) fn loop_var(&self, loop_node: NodeId, param: usize) -> Option<String> {
        self.loops
            .iter()
            .rev()
            .find(|l| l.node == loop_node && l.param == param)
            .map(|l| l.var.clone())
    }

    // --- analysis -----------------------------------------------------------------------------

    fn analyze(&mut self, id: NodeId) -> BuildResult<()> {
        let id = self.resolve(id)?;
        if self.analysis_path.contains(&id) {
            let location = self.location(id);
            return Err(BuildError::graph(format!("cycle detected through node {id}"))
                .located(location, self.stage));
        }
        let data = self.cache.entry(self.scope, id, Some(self.stage));
        data.usage += 1;
        if data.usage > 1 {
            return Ok(());
        }
        self.analysis_path.push(id);
        let result = self.with_node(id, |b| b.analyze_children(id));
        self.analysis_path.pop();
        result
    }

    fn analyze_children(&mut self, id: NodeId) -> BuildResult<()> {
        let kind = self.kind(id)?;
        match &kind {
            NodeKind::Cache { node, parent } => {
                let scope = self.cache_scope(id, *parent);
                self.in_scope(scope, |b| b.analyze(*node))
            }
            NodeKind::Context { node, values } => {
                self.in_context(id, values.clone(), |b| b.analyze(*node))
            }
            NodeKind::ContextValue { key, fallback } => {
                self.with_context_value(key, *fallback, |b, node| b.analyze(node))
            }
            NodeKind::Varying { node, .. } => {
                self.register_varying(id)?;
                self.in_stage(ShaderStage::Vertex, |b| b.analyze(*node))
            }
            NodeKind::Uniform { .. } => self.register_uniform(id).map(|_| ()),
            NodeKind::Attribute { name, ty } => self.register_attribute(name, ty.as_ref()),
            NodeKind::StorageBuffer { .. } => self.register_storage(id).map(|_| ()),
            NodeKind::Texture { name, .. } => {
                self.register_texture(name);
                kind.children().into_iter().try_for_each(|c| self.analyze(c))
            }
            NodeKind::FunctionCall { function, args } => {
                self.register_function(*function)?;
                args.iter().try_for_each(|a| self.analyze(*a))
            }
            _ => kind.children().into_iter().try_for_each(|c| self.analyze(c)),
        }
    }

    pub(crate) fn usage(&self, id: NodeId) -> u32 {
        self.cache.usage(self.scope, id, Some(self.stage))
    }

    // --- registration -------------------------------------------------------------------------

    /// Register a uniform node; returns its `(name, group)` key.
    pub(crate) fn register_uniform(&mut self, id: NodeId) -> BuildResult<(String, String)> {
        let NodeKind::Uniform {
            name,
            ty,
            group,
            update,
            value,
        } = self.kind(id)?
        else {
            return Err(BuildError::graph(format!("node {id} is not a uniform")));
        };
        if !ty.is_host_shareable() {
            return Err(BuildError::binding_layout(format!(
                "uniform `{name}` has type {ty}, which cannot live in a uniform buffer"
            )));
        }
        let group_name = group.unwrap_or_else(|| update.default_group().to_string());
        let key = (name.clone(), group_name.clone());
        if let Some(existing) = self.uniforms.get(&key) {
            if existing.ty != ty {
                return Err(BuildError::binding_layout(format!(
                    "uniform `{name}` in group `{group_name}` is {ty} here but {} elsewhere",
                    existing.ty
                )));
            }
        } else {
            if !self.groups.contains_key(&group_name) {
                let block = self.globals.claim(&format!("{}Uniforms", upper_camel(&group_name)), None);
                let instance =
                    self.globals.claim(&format!("{}Uniforms", lower_camel(&group_name)), None);
                self.groups.insert(
                    group_name.clone(),
                    GroupRecord {
                        block,
                        instance,
                        cadence: None,
                        members: Vec::new(),
                        binding: None,
                    },
                );
            }
            let member = self.globals.claim(&name, None);
            let type_name = self.dialect.type_name(&ty)?;
            if let Some(g) = self.groups.get_mut(&group_name) {
                g.members.push((member.clone(), type_name));
            }
            self.uniforms.insert(
                key.clone(),
                UniformRecord {
                    member,
                    ty,
                    group: group_name.clone(),
                    update,
                    value,
                    node: id,
                },
            );
        }
        if update != UpdateType::None {
            if let Some(g) = self.groups.get_mut(&group_name) {
                match g.cadence {
                    Some(existing) if existing != update => {
                        return Err(BuildError::binding_layout(format!(
                            "uniform `{name}` updates per {update:?} but group `{group_name}` updates per {existing:?}"
                        )));
                    }
                    _ => g.cadence = Some(update),
                }
            }
            self.update_nodes.insert(
                id,
                UpdateRecord {
                    graph: self.graph.uid(),
                    node: id,
                    label: name,
                    cadence: update,
                },
            );
        }
        Ok(key)
    }

    /// Mark the uniform's group as used by the current stage; returns the reference spelling.
    pub(crate) fn use_uniform(&mut self, key: &(String, String)) -> BuildResult<String> {
        let record = self
            .uniforms
            .get(key)
            .ok_or_else(|| BuildError::binding_layout(format!("uniform `{}` is not registered", key.0)))?;
        let member = record.member.clone();
        let group_name = record.group.clone();
        let group = self.groups.get_mut(&group_name).ok_or_else(|| {
            BuildError::binding_layout(format!("uniform group `{group_name}` is not registered"))
        })?;
        if group.binding.is_none() {
            group.binding = Some(self.next_binding);
            self.next_binding += 1;
        }
        let instance = group.instance.clone();
        self.stages[stage_index(self.stage)].groups.insert(group_name);
        Ok(self.dialect.uniform_ref(&instance, &member))
    }

    pub(crate) fn register_texture(&mut self, name: &str) {
        if self.textures.contains_key(name) {
            return;
        }
        let emitted = self.globals.claim(name, None);
        let sampler = self.globals.claim(&format!("{emitted}_sampler"), None);
        self.textures.insert(
            name.to_string(),
            TextureRecord {
                name: emitted,
                sampler,
                texture_binding: None,
                sampler_binding: None,
            },
        );
    }

    /// `(texture, sampler)` spellings, assigning bindings on first use.
    pub(crate) fn use_texture(&mut self, name: &str) -> (String, String) {
        self.register_texture(name);
        let mut next = self.next_binding;
        let names = match self.textures.get_mut(name) {
            Some(t) => {
                if t.texture_binding.is_none() {
                    t.texture_binding = Some(next);
                    t.sampler_binding = Some(next + 1);
                    next += 2;
                }
                (t.name.clone(), t.sampler.clone())
            }
            None => (name.to_string(), format!("{name}_sampler")),
        };
        self.next_binding = next;
        self.stages[stage_index(self.stage)]
            .textures
            .insert(name.to_string());
        names
    }

    pub(crate) fn register_storage(&mut self, id: NodeId) -> BuildResult<String> {
        let NodeKind::StorageBuffer {
            name,
            element,
            count,
            access,
        } = self.kind(id)?
        else {
            return Err(BuildError::graph(format!("node {id} is not a storage buffer")));
        };
        if let Some(existing) = self.storage.get(&name) {
            if existing.element != element || existing.count != count {
                return Err(BuildError::binding_layout(format!(
                    "storage buffer `{name}` is declared with conflicting layouts"
                )));
            }
            if access == StorageAccess::ReadWrite && existing.access == StorageAccess::Read {
                if let Some(s) = self.storage.get_mut(&name) {
                    s.access = StorageAccess::ReadWrite;
                }
            }
            return Ok(name);
        }
        if matches!(element, NodeType::Void | NodeType::Texture2D | NodeType::Array(..)) {
            return Err(BuildError::binding_layout(format!(
                "storage buffer `{name}` cannot hold {element} elements"
            )));
        }
        let emitted = self.globals.claim(&name, None);
        let block = self
            .globals
            .claim(&format!("{}Buffer", upper_camel(&emitted)), None);
        self.storage.insert(
            name.clone(),
            StorageRecord {
                name: emitted,
                block,
                element,
                count,
                access,
                binding: None,
            },
        );
        Ok(name)
    }

    /// Emitted name of a storage buffer, assigning its binding on first use.
    pub(crate) fn use_storage(&mut self, name: &str) -> BuildResult<(String, StorageAccess)> {
        let next = self.next_binding;
        let record = self
            .storage
            .get_mut(name)
            .ok_or_else(|| BuildError::binding_layout(format!("storage buffer `{name}` is not registered")))?;
        if record.binding.is_none() {
            record.binding = Some(next);
            self.next_binding += 1;
        }
        let out = (record.name.clone(), record.access);
        if let NodeType::Struct(s) = &record.element {
            let s = s.clone();
            self.mark_struct(&s)?;
        }
        self.stages[stage_index(self.stage)]
            .storage
            .insert(name.to_string());
        Ok(out)
    }

    pub(crate) fn attribute_type(&self, name: &str, explicit: Option<&NodeType>) -> BuildResult<NodeType> {
        if let Some(ty) = explicit {
            return Ok(ty.clone());
        }
        self.options.attributes.get(name).cloned().ok_or_else(|| {
            BuildError::type_resolution(format!(
                "attribute `{name}` has no declared type; add it to the build attributes"
            ))
        })
    }

    fn register_attribute(&mut self, name: &str, explicit: Option<&NodeType>) -> BuildResult<()> {
        let ty = self.attribute_type(name, explicit)?;
        if !ty.is_numeric_vector_or_scalar() || ty.scalar_kind() == Some(ScalarKind::Bool) {
            return Err(BuildError::type_resolution(format!(
                "attribute `{name}` cannot have type {ty}"
            )));
        }
        match self.attributes.get(name) {
            Some(existing) if existing.ty != ty => Err(BuildError::type_resolution(format!(
                "attribute `{name}` is read as {ty} and as {}",
                existing.ty
            ))),
            Some(_) => Ok(()),
            None => {
                let emitted = self.globals.claim(name, None);
                self.attributes.insert(
                    name.to_string(),
                    AttributeRecord {
                        name: emitted,
                        ty,
                        location: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// Emitted attribute name, assigning its location on first use.
    pub(crate) fn use_attribute(&mut self, name: &str, explicit: Option<&NodeType>) -> BuildResult<String> {
        self.register_attribute(name, explicit)?;
        let next = self.next_attribute;
        let Some(record) = self.attributes.get_mut(name) else {
            return Err(BuildError::type_resolution(format!("attribute `{name}` is not registered")));
        };
        if record.location.is_none() {
            record.location = Some(next);
            self.next_attribute += 1;
        }
        let emitted = record.name.clone();
        self.stages[stage_index(self.stage)]
            .attributes
            .insert(name.to_string());
        Ok(emitted)
    }

    pub(crate) fn register_varying(&mut self, id: NodeId) -> BuildResult<VaryingRecord> {
        if let Some(existing) = self.varyings.get(&id) {
            return Ok(existing.clone());
        }
        let NodeKind::Varying {
            node,
            name,
            interpolation,
            sampling,
        } = self.kind(id)?
        else {
            return Err(BuildError::graph(format!("node {id} is not a varying")));
        };
        if self.stage == ShaderStage::Compute {
            return Err(BuildError::scope("varyings are not available in compute shaders"));
        }
        if !self.is_stage_active(ShaderStage::Vertex) {
            return Err(BuildError::scope(
                "varying used without a vertex stage in the build",
            ));
        }
        let ty = self.node_type(node)?;
        if !ty.is_numeric_vector_or_scalar() || ty.scalar_kind() == Some(ScalarKind::Bool) {
            return Err(BuildError::type_resolution(format!(
                "{ty} values cannot be passed between stages"
            )));
        }
        // Integer varyings cannot be interpolated.
        let interpolation = match ty.scalar_kind() {
            Some(ScalarKind::Int | ScalarKind::Uint) => Interpolation::Flat,
            _ => interpolation,
        };
        let emitted = match &name {
            Some(n) => self.globals.claim(&format!("v_{n}"), None),
            None => self
                .globals
                .claim_numbered("nodeVarying", &mut self.varying_counter, None),
        };
        let record = VaryingRecord {
            name: emitted,
            ty,
            node,
            interpolation,
            sampling,
            location: None,
            assigned: false,
        };
        self.varyings.insert(id, record.clone());
        Ok(record)
    }

    /// Write the varying in the vertex stage if that has not happened yet.
    pub(crate) fn ensure_varying_assigned(&mut self, id: NodeId) -> BuildResult<VaryingRecord> {
        let record = self.register_varying(id)?;
        if record.assigned {
            return Ok(record);
        }
        let target = self.dialect.varying_ref(ShaderStage::Vertex, &record.name);
        let ty = record.ty.clone();
        let child = record.node;
        self.in_stage(ShaderStage::Vertex, |b| {
            let code = b.build_node(child, Some(&ty))?;
            b.add_line(format!("{target} = {code};"));
            b.stages[stage_index(ShaderStage::Vertex)].varyings.insert(id);
            Ok(())
        })?;
        let next = self.next_varying;
        let Some(stored) = self.varyings.get_mut(&id) else {
            return Err(BuildError::graph(format!("varying {id} vanished")));
        };
        stored.assigned = true;
        if stored.location.is_none() {
            stored.location = Some(next);
            self.next_varying += 1;
        }
        trace!(varying = %stored.name, "assigned varying in vertex stage");
        Ok(stored.clone())
    }

    pub(crate) fn mark_varying_read(&mut self, id: NodeId) {
        self.stages[stage_index(self.stage)].varyings.insert(id);
    }

    pub(crate) fn register_function(&mut self, id: FunctionId) -> BuildResult<FunctionRecord> {
        if let Some(existing) = self.functions.get(&id) {
            return Ok(existing.clone());
        }
        if !self.registering.insert(id) {
            return Err(BuildError::graph(
                "native function includes form a cycle",
            ));
        }
        let result = self.register_function_inner(id);
        self.registering.remove(&id);
        let record = result?;
        self.functions.insert(id, record.clone());
        Ok(record)
    }

    fn register_function_inner(&mut self, id: FunctionId) -> BuildResult<FunctionRecord> {
        let native = self
            .graph
            .function(id)
            .cloned()
            .ok_or_else(|| BuildError::graph(format!("native function #{} does not exist", id.index())))?;
        let mut include_sources = Vec::new();
        for include in &native.includes {
            let dep = self.register_function(*include)?;
            include_sources.push(dep.source_code);
        }
        let parsed = parser_for(native.dialect).parse_function(&native.source)?;
        let name = self.globals.claim(parsed.name(), None);
        let source_code = parsed.code(&name);
        let (name, code) = match (native.dialect, self.options.dialect) {
            (source, target) if source == target => (name, source_code.clone()),
            (Dialect::Glsl, Dialect::Wgsl) => {
                let translated = translate_glsl_function(parsed.as_ref(), &name, &include_sources)?;
                if translated.name != name {
                    self.globals.reserve(&translated.name);
                }
                (translated.name, translated.code)
            }
            (source, target) => {
                return Err(BuildError::dialect(format!(
                    "{source:?} function `{}` cannot be used in a {target:?} build",
                    parsed.name()
                )));
            }
        };
        debug!(function = %name, "registered native function");
        Ok(FunctionRecord {
            name,
            inputs: parsed.inputs().to_vec(),
            return_type: parsed.return_type().clone(),
            code,
            source_code,
            includes: native.includes.clone(),
        })
    }

    /// Mark a function and its includes (dependencies first) as used by the current stage.
    pub(crate) fn use_function(&mut self, id: FunctionId) -> BuildResult<()> {
        let record = self.register_function(id)?;
        let idx = stage_index(self.stage);
        if self.stages[idx].functions.contains(&id) {
            return Ok(());
        }
        for include in &record.includes {
            self.use_function(*include)?;
        }
        for input in &record.inputs {
            self.mark_type(&input.value_type())?;
        }
        self.mark_type(&record.return_type)?;
        self.stages[idx].functions.insert(id);
        Ok(())
    }

    fn mark_struct(&mut self, name: &str) -> BuildResult<()> {
        let idx = stage_index(self.stage);
        if self.stages[idx].structs.contains(name) {
            return Ok(());
        }
        let members = self.struct_members(name)?.to_vec();
        for m in &members {
            self.mark_type(&m.ty)?;
        }
        self.stages[idx].structs.insert(name.to_string());
        Ok(())
    }

    fn mark_type(&mut self, ty: &NodeType) -> BuildResult<()> {
        match ty {
            NodeType::Struct(name) => self.mark_struct(name),
            NodeType::Array(elem, _) => self.mark_type(elem),
            _ => Ok(()),
        }
    }

    /// Dialect spelling of `ty`, declaring any struct it needs in the current stage.
    pub(crate) fn type_name(&mut self, ty: &NodeType) -> BuildResult<String> {
        self.mark_type(ty)?;
        self.dialect.type_name(ty)
    }

    pub(crate) fn use_builtin(&mut self, builtin: BuiltinValue) -> BuildResult<String> {
        if builtin.stage() != self.stage {
            return Err(BuildError::scope(format!(
                "builtin {builtin:?} is only available in the {} stage",
                builtin.stage()
            )));
        }
        self.stages[stage_index(self.stage)].builtins.insert(builtin);
        Ok(self.dialect.builtin_ref(builtin))
    }

    /// Per-stage property variable, declared at the top of the entry point on first use.
    pub(crate) fn use_property(&mut self, name: &str, ty: &NodeType) -> BuildResult<String> {
        let idx = stage_index(self.stage);
        if let Some((existing, emitted)) = self.stages[idx].properties.get(name) {
            if existing != ty {
                return Err(BuildError::type_resolution(format!(
                    "property `{name}` is {ty} here but {existing} elsewhere"
                )));
            }
            return Ok(emitted.clone());
        }
        let type_name = self.type_name(ty)?;
        let emitted = self.claim_local(name);
        let decl = self.dialect.var_decl(&emitted, &type_name, None, VarKind::Mutable);
        let sb = &mut self.stages[idx];
        sb.locals.push(decl);
        sb.properties
            .insert(name.to_string(), (ty.clone(), emitted.clone()));
        Ok(emitted)
    }

    // --- types --------------------------------------------------------------------------------

    /// Resolved output type of a node in the current context.
    pub(crate) fn node_type(&mut self, id: NodeId) -> BuildResult<NodeType> {
        let id = self.resolve(id)?;
        let key = (id, self.context.current());
        if let Some(ty) = self.types.get(&key) {
            return Ok(ty.clone());
        }
        if !self.typing.insert(key) {
            return Err(BuildError::graph(format!(
                "cycle detected while resolving the type of node {id}"
            )));
        }
        let result = self.with_node(id, |b| node_compiler::resolve_node_type(b, id));
        self.typing.remove(&key);
        let ty = result?;
        self.types.insert(key, ty.clone());
        Ok(ty)
    }

    /// Implicit conversion: scalar splats and scalar-kind changes at equal width only.
    pub(crate) fn coerce(&mut self, code: &str, from: &NodeType, to: &NodeType) -> BuildResult<String> {
        if from == to {
            return Ok(code.to_string());
        }
        let err = || BuildError::type_resolution(format!("cannot implicitly convert {from} to {to}"));
        let (Some(fk), Some(tk)) = (from.scalar_kind(), to.scalar_kind()) else {
            return Err(err());
        };
        if from.is_matrix() || to.is_matrix() || fk == ScalarKind::Bool || tk == ScalarKind::Bool {
            return Err(err());
        }
        if from.is_scalar() {
            let scalar = if fk != tk {
                let scalar_ty = NodeType::vector(tk, 1).ok_or_else(err)?;
                let name = self.type_name(&scalar_ty)?;
                self.dialect.constructor(&name, &[code.to_string()])
            } else {
                code.to_string()
            };
            if to.is_scalar() {
                return Ok(scalar);
            }
            let name = self.type_name(to)?;
            return Ok(self.dialect.constructor(&name, &[scalar]));
        }
        if from.is_vector() && to.is_vector() && from.components() == to.components() {
            let name = self.type_name(to)?;
            return Ok(self.dialect.constructor(&name, &[code.to_string()]));
        }
        Err(err())
    }

    /// Explicit conversion: any scalar/vector to any scalar/vector.
    pub(crate) fn convert(&mut self, code: &str, from: &NodeType, to: &NodeType) -> BuildResult<String> {
        if from == to {
            return Ok(code.to_string());
        }
        let err = || BuildError::type_resolution(format!("cannot convert {from} to {to}"));
        if from.is_matrix() || to.is_matrix() {
            return Err(err());
        }
        let (Some(fk), Some(tk)) = (from.scalar_kind(), to.scalar_kind()) else {
            return Err(err());
        };
        let (n_from, n_to) = (from.components(), to.components());
        let casted = if fk != tk {
            let same_width = from.with_scalar_kind(tk).ok_or_else(err)?;
            let name = self.type_name(&same_width)?;
            self.dialect.constructor(&name, &[code.to_string()])
        } else {
            code.to_string()
        };
        if n_from == n_to {
            return Ok(casted);
        }
        if n_from == 1 {
            let name = self.type_name(to)?;
            return Ok(self.dialect.constructor(&name, &[casted]));
        }
        if n_to < n_from {
            return Ok(format!("{casted}.{}", &"xyzw"[..n_to as usize]));
        }
        let mut args = vec![casted];
        for i in n_from..n_to {
            // Padding follows the homogeneous convention: w = 1.
            let fill = if i == 3 { 1.0 } else { 0.0 };
            args.push(self.dialect.scalar_literal(tk, fill));
        }
        let name = self.type_name(to)?;
        Ok(self.dialect.constructor(&name, &args))
    }

    // --- generation ---------------------------------------------------------------------------

    /// Generate `id`, coercing the result to `expected` when given.
    pub(crate) fn build_node(&mut self, id: NodeId, expected: Option<&NodeType>) -> BuildResult<String> {
        let id = self.resolve(id)?;
        self.with_node(id, |b| {
            let code = node_compiler::generate_node(b, id)?;
            match expected {
                Some(target) => {
                    let ty = b.node_type(id)?;
                    if ty == NodeType::Void {
                        return Err(BuildError::type_resolution(format!(
                            "expected a {target} value but the node produces none"
                        )));
                    }
                    b.coerce(&code, &ty, target)
                }
                None => Ok(code),
            }
        })
    }

    /// Generate `id` for its side effects only.
    pub(crate) fn build_statement(&mut self, id: NodeId) -> BuildResult<()> {
        self.build_node(id, None).map(|_| ())
    }

    /// Reuse a materialized snippet, or generate and materialize when referenced more than once.
    pub(crate) fn build_temp(
        &mut self,
        id: NodeId,
        force: bool,
        f: impl FnOnce(&mut Self) -> BuildResult<String>,
    ) -> BuildResult<String> {
        if let Some(code) = self.cached_snippet(id) {
            return Ok(code);
        }
        let code = f(self)?;
        let ty = self.node_type(id)?;
        if ty == NodeType::Void || !(force || self.usage(id) > 1) {
            return Ok(code);
        }
        let name = self.declare_temp(&ty, &code)?;
        self.cache_snippet(id, &name);
        Ok(name)
    }

    pub(crate) fn cached_snippet(&self, id: NodeId) -> Option<String> {
        let data = self.cache.get(self.scope, id, Some(self.stage))?;
        let snippet = data.snippet.as_ref()?;
        if snippet.frame.is_some_and(|f| f != self.context.current()) {
            return None;
        }
        let open = &self.stages[stage_index(self.stage)].blocks;
        open.iter()
            .any(|b| b.id == snippet.block)
            .then(|| snippet.code.clone())
    }

    /// Cache the materialized value of `id`, valid only under the current context frame.
    pub(crate) fn cache_snippet(&mut self, id: NodeId, code: &str) {
        let frame = Some(self.context.current());
        self.store_snippet(id, code, frame);
    }

    /// Cache a declared variable, shared by every context frame that reaches it.
    pub(crate) fn cache_variable(&mut self, id: NodeId, name: &str) {
        self.store_snippet(id, name, None);
    }

    fn store_snippet(&mut self, id: NodeId, code: &str, frame: Option<FrameId>) {
        let block = self.current_block();
        self.cache.entry(self.scope, id, Some(self.stage)).snippet = Some(CachedSnippet {
            code: code.to_string(),
            block,
            frame,
        });
    }

    pub(crate) fn claim_local(&mut self, preferred: &str) -> String {
        let sb = &mut self.stages[stage_index(self.stage)];
        sb.names.claim(preferred, Some(&self.globals))
    }

    pub(crate) fn release_local(&mut self, name: &str) {
        self.stages[stage_index(self.stage)].names.release(name);
    }

    pub(crate) fn claim_temp(&mut self) -> String {
        let sb = &mut self.stages[stage_index(self.stage)];
        sb.names
            .claim_numbered("nodeVar", &mut sb.temp_counter, Some(&self.globals))
    }

    pub(crate) fn declare_temp(&mut self, ty: &NodeType, code: &str) -> BuildResult<String> {
        let type_name = self.type_name(ty)?;
        let name = self.claim_temp();
        let line = self
            .dialect
            .var_decl(&name, &type_name, Some(code), VarKind::Immutable);
        self.add_line(line);
        trace!(name = %name, stage = %self.stage, "materialized temp");
        Ok(name)
    }

    fn current_block(&self) -> BlockId {
        self.stages[stage_index(self.stage)]
            .blocks
            .last()
            .map_or(BlockId(0), |b| b.id)
    }

    pub(crate) fn add_line(&mut self, line: impl Into<String>) {
        let sb = &mut self.stages[stage_index(self.stage)];
        if let Some(block) = sb.blocks.last_mut() {
            block.lines.push(line.into());
        }
    }

    pub(crate) fn open_block(&mut self) {
        let sb = &mut self.stages[stage_index(self.stage)];
        let id = BlockId(sb.next_block);
        sb.next_block += 1;
        sb.blocks.push(Block {
            id,
            lines: Vec::new(),
        });
    }

    /// Close the innermost flow block and return its lines. The root block never closes.
    pub(crate) fn close_block(&mut self) -> Vec<String> {
        let sb = &mut self.stages[stage_index(self.stage)];
        if sb.blocks.len() <= 1 {
            return Vec::new();
        }
        sb.blocks.pop().map(|b| b.lines).unwrap_or_default()
    }

    /// Emit `header`, the indented `lines`, and `footer` into the current block.
    pub(crate) fn emit_block(&mut self, header: String, lines: Vec<String>, footer: &str) {
        self.add_line(header);
        for line in lines {
            self.add_line(format!("    {line}"));
        }
        self.add_line(footer.to_string());
    }

    fn generate_stage(&mut self, stage: ShaderStage, root: NodeId) -> BuildResult<()> {
        self.stage = stage;
        self.scope = ScopeId::ROOT;
        let output = match stage {
            ShaderStage::Vertex | ShaderStage::Fragment => Some(self.build_node(root, Some(&NodeType::Vec4))?),
            ShaderStage::Compute => {
                let code = self.build_node(root, None)?;
                if !code.is_empty() && self.node_type(root)? != NodeType::Void {
                    warn!(root = %root, "compute root produces a value that is discarded");
                }
                None
            }
        };
        self.stages[stage_index(stage)].output = output;
        debug!(
            stage = %stage,
            lines = self.stages[stage_index(stage)].blocks[0].lines.len(),
            "generated stage"
        );
        Ok(())
    }

    // --- assembly -----------------------------------------------------------------------------

    fn stage_program(&self, stage: ShaderStage) -> BuildResult<StageProgram> {
        let sb = &self.stages[stage_index(stage)];
        let mut program = StageProgram::new(stage);
        program.workgroup_size = self.options.workgroup_size;

        for name in &sb.structs {
            let members = self
                .struct_members(name)?
                .iter()
                .map(|m| Ok((m.name.clone(), self.dialect.type_name(&m.ty)?)))
                .collect::<BuildResult<Vec<_>>>()?;
            program.structs.push(StructDecl {
                name: name.clone(),
                members,
            });
        }
        for group_name in &sb.groups {
            if let Some(g) = self.groups.get(group_name) {
                program.uniforms.push(UniformBlockDecl {
                    block: g.block.clone(),
                    instance: g.instance.clone(),
                    binding: g.binding.unwrap_or_default(),
                    members: g.members.clone(),
                });
            }
        }
        program.uniforms.sort_by_key(|u| u.binding);
        for name in &sb.textures {
            if let Some(t) = self.textures.get(name) {
                program.textures.push(TextureDecl {
                    name: t.name.clone(),
                    sampler: t.sampler.clone(),
                    texture_binding: t.texture_binding.unwrap_or_default(),
                    sampler_binding: t.sampler_binding.unwrap_or_default(),
                });
            }
        }
        program.textures.sort_by_key(|t| t.texture_binding);
        for name in &sb.storage {
            if let Some(s) = self.storage.get(name) {
                program.storage.push(StorageDecl {
                    name: s.name.clone(),
                    block: s.block.clone(),
                    binding: s.binding.unwrap_or_default(),
                    element: self.dialect.type_name(&s.element)?,
                    count: s.count,
                    read_only: s.access == StorageAccess::Read,
                });
            }
        }
        program.storage.sort_by_key(|s| s.binding);
        for name in &sb.attributes {
            if let Some(a) = self.attributes.get(name) {
                program.attributes.push(LocationDecl {
                    name: a.name.clone(),
                    location: a.location.unwrap_or_default(),
                    ty: self.dialect.type_name(&a.ty)?,
                    interpolation: Interpolation::Perspective,
                    sampling: None,
                });
            }
        }
        program.attributes.sort_by_key(|a| a.location);
        for id in &sb.varyings {
            if let Some(v) = self.varyings.get(id) {
                program.varyings.push(LocationDecl {
                    name: v.name.clone(),
                    location: v.location.unwrap_or_default(),
                    ty: self.dialect.type_name(&v.ty)?,
                    interpolation: v.interpolation,
                    sampling: v.sampling,
                });
            }
        }
        program.varyings.sort_by_key(|v| v.location);
        program.builtins = sb.builtins.iter().copied().collect();
        program.functions = sb
            .functions
            .iter()
            .filter_map(|id| self.functions.get(id).map(|f| f.code.clone()))
            .collect();
        program.locals = sb.locals.clone();
        program.body = sb.blocks.first().map(|b| b.lines.clone()).unwrap_or_default();
        program.output = sb.output.clone();
        Ok(program)
    }

    fn visibility(&self, used: impl Fn(&StageBuild) -> bool) -> Vec<ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(|s| {
                let sb = &self.stages[stage_index(*s)];
                sb.active && used(sb)
            })
            .collect()
    }

    fn assemble(self, roots: &[(ShaderStage, NodeId)]) -> BuildResult<NodeBuilderState> {
        let mut state = NodeBuilderState {
            dialect: self.options.dialect,
            ..NodeBuilderState::default()
        };

        for (stage, _) in roots {
            let program = self.stage_program(*stage)?;
            let source = self.dialect.assemble(&program);
            if self.options.validate {
                let checked = match self.options.dialect {
                    Dialect::Wgsl => validate_wgsl_module(&source).map(|_| ()),
                    Dialect::Glsl => validate_glsl(&source, *stage).map(|_| ()),
                };
                checked.map_err(|e| {
                    let mut err = BuildError::dialect(format!("{e:#}"));
                    err.stage = Some(*stage);
                    err
                })?;
            }
            match stage {
                ShaderStage::Vertex => state.vertex = Some(source),
                ShaderStage::Fragment => state.fragment = Some(source),
                ShaderStage::Compute => state.compute = Some(source),
            }
        }

        let mut bindings = Vec::new();
        for (group_name, g) in &self.groups {
            let Some(binding) = g.binding else { continue };
            let members: Vec<(String, NodeType, Vec<f32>)> = self
                .uniforms
                .values()
                .filter(|u| &u.group == group_name)
                .map(|u| (u.member.clone(), u.ty.clone(), u.value.clone()))
                .collect();
            let (members, size) = std140_layout(&members);
            bindings.push(Binding::UniformBuffer(UniformBufferBinding {
                group: group_name.clone(),
                block: g.block.clone(),
                binding,
                cadence: g.cadence.unwrap_or_default(),
                size,
                members,
                visibility: self.visibility(|sb| sb.groups.contains(group_name)),
            }));
        }
        for (name, t) in &self.textures {
            let (Some(tb), Some(sb_binding)) = (t.texture_binding, t.sampler_binding) else {
                continue;
            };
            let visibility = self.visibility(|sb| sb.textures.contains(name));
            bindings.push(Binding::Texture {
                name: t.name.clone(),
                binding: tb,
                visibility: visibility.clone(),
            });
            bindings.push(Binding::Sampler {
                name: t.sampler.clone(),
                binding: sb_binding,
                visibility,
            });
        }
        for (name, s) in &self.storage {
            let Some(binding) = s.binding else { continue };
            bindings.push(Binding::StorageBuffer {
                name: s.name.clone(),
                binding,
                element: s.element.clone(),
                count: s.count,
                read_only: s.access == StorageAccess::Read,
                visibility: self.visibility(|sb| sb.storage.contains(name)),
            });
        }
        bindings.sort_by_key(Binding::binding);
        state.bindings = bindings;

        state.uniforms = self
            .uniforms
            .iter()
            .filter(|(_, u)| self.groups.get(&u.group).is_some_and(|g| g.binding.is_some()))
            .map(|((name, _), u)| NodeUniform {
                name: name.clone(),
                ty: u.ty.clone(),
                group: u.group.clone(),
                update: u.update,
                value: u.value.clone(),
                node: u.node,
            })
            .collect();

        let mut attributes: Vec<NodeAttribute> = self
            .attributes
            .values()
            .filter_map(|a| {
                a.location.map(|location| NodeAttribute {
                    name: a.name.clone(),
                    ty: a.ty.clone(),
                    location,
                })
            })
            .collect();
        attributes.sort_by_key(|a| a.location);
        state.attributes = attributes;

        let mut varyings: Vec<NodeVarying> = self
            .varyings
            .values()
            .filter_map(|v| {
                v.location.map(|location| NodeVarying {
                    name: v.name.clone(),
                    ty: v.ty.clone(),
                    location,
                    interpolation: v.interpolation,
                    sampling: v.sampling,
                })
            })
            .collect();
        varyings.sort_by_key(|v| v.location);
        state.varyings = varyings;

        state.codes = self
            .functions
            .iter()
            .filter_map(|(id, f)| {
                let stages = self.visibility(|sb| sb.functions.contains(id));
                (!stages.is_empty()).then(|| NodeCode {
                    name: f.name.clone(),
                    code: f.code.clone(),
                    stages,
                })
            })
            .collect();
        state.update_nodes = self.update_nodes.into_values().collect();
        state.update_before_nodes = self.update_before_nodes.into_values().collect();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_orders_stages() {
        let req = BuildRequest::new()
            .fragment(NodeId::from_index(2))
            .vertex(NodeId::from_index(1));
        let stages: Vec<ShaderStage> = req.stages().into_iter().map(|(s, _)| s).collect();
        assert_eq!(stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
    }

    #[test]
    fn test_empty_request_is_rejected() {
        let graph = NodeGraph::new();
        let err = NodeBuilder::new(&graph, BuildOptions::default())
            .build(&BuildRequest::new())
            .unwrap_err();
        assert!(err.is_graph());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: BuildOptions = serde_json::from_str(r#"{"dialect":"glsl"}"#).unwrap();
        assert_eq!(opts.dialect, Dialect::Glsl);
        assert_eq!(opts.attributes.get("uv"), Some(&NodeType::Vec2));
        assert_eq!(opts.workgroup_size, [64, 1, 1]);
    }

    #[test]
    fn test_implicit_coercion_rules() {
        let graph = NodeGraph::new();
        let mut b = NodeBuilder::new(&graph, BuildOptions::default());
        assert_eq!(
            b.coerce("x", &NodeType::Float, &NodeType::Vec3).unwrap(),
            "vec3<f32>(x)"
        );
        assert_eq!(
            b.coerce("i", &NodeType::Int, &NodeType::Float).unwrap(),
            "f32(i)"
        );
        assert!(
            b.coerce("v", &NodeType::Vec3, &NodeType::Vec2)
                .unwrap_err()
                .is_type_resolution()
        );
        assert_eq!(b.convert("v", &NodeType::Vec3, &NodeType::Vec2).unwrap(), "v.xy");
        assert_eq!(
            b.convert("v", &NodeType::Vec3, &NodeType::Vec4).unwrap(),
            "vec4<f32>(v, 1.0)"
        );
    }
}
