//! Build errors raised while compiling a node graph.

use std::fmt;

use thiserror::Error;

use super::graph::NodeId;
use super::types::ShaderStage;

/// Identifies one node in a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLocation {
    pub id: NodeId,
    pub kind: &'static str,
    pub label: Option<String>,
}

impl fmt::Display for NodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id.index())?;
        if let Some(label) = &self.label {
            write!(f, " `{label}`")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildErrorKind {
    /// Incompatible or unresolvable node types.
    #[error("type resolution error: {0}")]
    TypeResolution(String),
    /// A node used outside the scope or stage it is valid in.
    #[error("scope error: {0}")]
    Scope(String),
    /// Native code the target backend cannot parse or lower.
    #[error("dialect error: {0}")]
    Dialect(String),
    /// Aggregate or binding access against an undeclared or mismatched layout.
    #[error("binding layout error: {0}")]
    BindingLayout(String),
    /// Structural graph problems: dangling ids, cycles, runaway setup expansion.
    #[error("graph error: {0}")]
    Graph(String),
}

/// Error returned by a failed build. Carries the innermost failing node and the
/// chain of enclosing nodes that were being built (innermost first).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}{}", site_suffix(.node, .stage))]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub node: Option<NodeLocation>,
    pub stage: Option<ShaderStage>,
    pub trace: Vec<NodeLocation>,
}

fn site_suffix(node: &Option<NodeLocation>, stage: &Option<ShaderStage>) -> String {
    match (node, stage) {
        (Some(node), Some(stage)) => format!(" (at {node}, {stage} stage)"),
        (Some(node), None) => format!(" (at {node})"),
        (None, Some(stage)) => format!(" ({stage} stage)"),
        (None, None) => String::new(),
    }
}

impl BuildError {
    fn new(kind: BuildErrorKind) -> Self {
        Self {
            kind,
            node: None,
            stage: None,
            trace: Vec::new(),
        }
    }

    pub fn type_resolution(message: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::TypeResolution(message.into()))
    }

    pub fn scope(message: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::Scope(message.into()))
    }

    pub fn dialect(message: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::Dialect(message.into()))
    }

    pub fn binding_layout(message: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::BindingLayout(message.into()))
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::new(BuildErrorKind::Graph(message.into()))
    }

    pub fn kind(&self) -> &BuildErrorKind {
        &self.kind
    }

    pub fn is_type_resolution(&self) -> bool {
        matches!(self.kind, BuildErrorKind::TypeResolution(_))
    }

    pub fn is_scope(&self) -> bool {
        matches!(self.kind, BuildErrorKind::Scope(_))
    }

    pub fn is_dialect(&self) -> bool {
        matches!(self.kind, BuildErrorKind::Dialect(_))
    }

    pub fn is_binding_layout(&self) -> bool {
        matches!(self.kind, BuildErrorKind::BindingLayout(_))
    }

    pub fn is_graph(&self) -> bool {
        matches!(self.kind, BuildErrorKind::Graph(_))
    }

    /// Record `location` as the failing node if none is set yet, and append it to the trace.
    pub(crate) fn located(mut self, location: NodeLocation, stage: ShaderStage) -> Self {
        if self.node.is_none() {
            self.node = Some(location.clone());
        }
        if self.stage.is_none() {
            self.stage = Some(stage);
        }
        if self.trace.last() != Some(&location) {
            self.trace.push(location);
        }
        self
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_failing_node() {
        let err = BuildError::scope("break outside of a loop").located(
            NodeLocation {
                id: NodeId::from_index(7),
                kind: "Break",
                label: None,
            },
            ShaderStage::Fragment,
        );
        assert_eq!(
            err.to_string(),
            "scope error: break outside of a loop (at Break#7, fragment stage)"
        );
        assert!(err.is_scope());
        assert_eq!(err.trace.len(), 1);
    }

    #[test]
    fn test_trace_grows_outward_and_keeps_innermost_node() {
        let inner = NodeLocation {
            id: NodeId::from_index(1),
            kind: "Split",
            label: Some("z".to_string()),
        };
        let outer = NodeLocation {
            id: NodeId::from_index(2),
            kind: "Var",
            label: None,
        };
        let err = BuildError::type_resolution("component out of range")
            .located(inner.clone(), ShaderStage::Vertex)
            .located(outer.clone(), ShaderStage::Vertex);
        assert_eq!(err.node, Some(inner.clone()));
        assert_eq!(err.trace, vec![inner, outer]);
    }
}
