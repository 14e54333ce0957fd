//! Node-graph shader compiler.
//!
//! This module is organized into several submodules:
//! - `graph`: the node arena, node kinds and graph construction helpers
//! - `types`: value types, stages, dialects and update cadences
//! - `builder`: the build passes (setup, analyze, generate, assemble)
//! - `node_compiler`: per-kind type resolution and code generation
//! - `cache` / `context`: cache scopes and context frames used during a build
//! - `dialect`: GLSL-like and WGSL-like backends plus native function parsing
//! - `state`: the immutable build result handed to a renderer
//! - `frame`: update scheduling for recorded nodes
//! - `program_cache`: memoized builds per graph version
//! - `validation`: naga parsing and validation helpers
//!
//! The main entry points are:
//! - [`build`]: compile a graph for the requested stages
//! - [`ProgramCache`]: the same, memoized across calls

pub mod builder;
pub mod cache;
pub mod context;
pub mod dialect;
pub mod error;
pub mod frame;
pub mod graph;
pub mod node_compiler;
pub mod program_cache;
pub mod state;
pub mod types;
pub mod utils;
pub mod validation;

use tracing::debug;

pub use builder::{BuildOptions, BuildRequest, NodeBuilder};
pub use error::{BuildError, BuildErrorKind, BuildResult, NodeLocation};
pub use frame::NodeFrame;
pub use graph::{CustomNode, FunctionId, LoopParam, NodeGraph, NodeId, NodeKind};
pub use program_cache::ProgramCache;
pub use state::{Binding, NodeBuilderState, UpdateRecord};
pub use types::{Dialect, NodeType, ShaderStage, UpdateType};

/// Compile `graph` for every stage named in `request`.
pub fn build(
    graph: &NodeGraph,
    request: &BuildRequest,
    options: &BuildOptions,
) -> BuildResult<NodeBuilderState> {
    debug!(
        graph = graph.uid(),
        version = graph.version(),
        dialect = ?options.dialect,
        "building node graph"
    );
    NodeBuilder::new(graph, options.clone()).build(request)
}
