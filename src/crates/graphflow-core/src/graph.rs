//! Graph definition and builder
//!
//! A [`StateGraph`] is the declarative model: channels, nodes and edges. It
//! executes nothing by itself; [`StateGraph::compile`] validates the
//! structure, inlines nested subgraphs, synthesizes parallel fan-out nodes
//! and returns a [`CompiledGraph`](crate::compiled::CompiledGraph).
//!
//! Nodes are async actions over the shared state. Edges are either direct
//! (`source -> target`) or conditional (an async router whose label is
//! mapped to a target). Adding a second direct edge from the same source
//! turns that source into a parallel fan-out.
//!
//! # Example
//!
//! ```rust,no_run
//! use graphflow_core::graph::{node_action, StateGraph, END, START};
//! use graphflow_checkpoint::AppenderChannel;
//! use serde_json::json;
//!
//! # fn build() -> graphflow_core::error::Result<StateGraph> {
//! let graph = StateGraph::new()
//!     .add_channel("messages", AppenderChannel::new())
//!     .add_node("greet", node_action(|_state| async { Ok(json!({"messages": "A"})) }))?
//!     .add_node("reply", node_action(|_state| async { Ok(json!({"messages": "B"})) }))?
//!     .add_edge(START, "greet")?
//!     .add_edge("greet", "reply")?
//!     .add_edge("reply", END)?;
//! # Ok(graph)
//! # }
//! ```

use crate::command::Command;
use crate::compile::CompileConfig;
use crate::compiled::CompiledGraph;
use crate::config::RunnableConfig;
use crate::error::{BoxError, GraphError, Result};
use crate::interrupt::InterruptionMetadata;
use crate::node_result::NodeResult;
use futures::future::BoxFuture;
use graphflow_checkpoint::channels::{Channel, Channels, StateData};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Virtual entry node id
pub const START: &str = "__start__";
/// Virtual exit node id
pub const END: &str = "__end__";

/// Node identifier
pub type NodeId = String;

/// Async node action: `(state, config) -> NodeResult`
pub type NodeActionFn = Arc<
    dyn Fn(StateData, RunnableConfig) -> BoxFuture<'static, std::result::Result<NodeResult, BoxError>>
        + Send
        + Sync,
>;

/// Async conditional edge action: `(state, config) -> Command`
pub type EdgeActionFn = Arc<
    dyn Fn(StateData, RunnableConfig) -> BoxFuture<'static, std::result::Result<Command, BoxError>>
        + Send
        + Sync,
>;

/// Per-node interrupt hook: `(node_id, state) -> Option<InterruptionMetadata>`
///
/// Evaluated just before the node executes; returning `Some` pauses the run
/// with that metadata. Resuming re-evaluates the hook, so it should inspect
/// the state for whatever the pause was waiting on.
pub type InterruptHookFn =
    Arc<dyn Fn(&str, &StateData) -> Option<InterruptionMetadata> + Send + Sync>;

/// Wrap an async closure over the state as a [`NodeActionFn`]
///
/// The closure returns a JSON object used as the node's partial update
/// (`null` fields reset their key).
pub fn node_action<F, Fut>(f: F) -> NodeActionFn
where
    F: Fn(StateData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |state, _config| {
        let fut = f(state);
        Box::pin(async move { Ok(NodeResult::from(fut.await?)) })
    })
}

/// Like [`node_action`], with access to the run config
pub fn node_action_with_config<F, Fut>(f: F) -> NodeActionFn
where
    F: Fn(StateData, RunnableConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |state, config| {
        let fut = f(state, config);
        Box::pin(async move { Ok(NodeResult::from(fut.await?)) })
    })
}

/// Wrap an async closure returning a branch label as an [`EdgeActionFn`]
pub fn router<F, Fut>(f: F) -> EdgeActionFn
where
    F: Fn(StateData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<String, BoxError>> + Send + 'static,
{
    Arc::new(move |state, _config| {
        let fut = f(state);
        Box::pin(async move { Ok(Command::goto(fut.await?)) })
    })
}

/// Wrap an async closure returning a full [`Command`] as an [`EdgeActionFn`]
pub fn command_action<F, Fut>(f: F) -> EdgeActionFn
where
    F: Fn(StateData, RunnableConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Command, BoxError>> + Send + 'static,
{
    Arc::new(move |state, config| Box::pin(f(state, config)))
}

/// Conditional edge: router action plus label-to-target mappings
#[derive(Clone)]
pub struct EdgeCondition {
    pub action: EdgeActionFn,
    pub mappings: HashMap<String, NodeId>,
}

impl std::fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCondition")
            .field("action", &"<action>")
            .field("mappings", &self.mappings)
            .finish()
    }
}

/// One target of an edge
#[derive(Clone, Debug)]
pub enum EdgeValue {
    /// Unconditional transition
    Direct(NodeId),
    /// Routed transition
    Conditional(EdgeCondition),
}

impl EdgeValue {
    /// Direct target id, when this is a direct edge
    pub fn direct_target(&self) -> Option<&str> {
        match self {
            EdgeValue::Direct(id) => Some(id),
            EdgeValue::Conditional(_) => None,
        }
    }

    /// True when the value routes (directly or via mapping) to `id`
    pub(crate) fn targets_id(&self, id: &str) -> bool {
        match self {
            EdgeValue::Direct(target) => target == id,
            EdgeValue::Conditional(condition) => {
                condition.mappings.values().any(|target| target == id)
            }
        }
    }

    /// Rewrite every referenced target id through `f`
    pub(crate) fn map_targets(&self, f: impl Fn(&str) -> String) -> EdgeValue {
        match self {
            EdgeValue::Direct(target) => EdgeValue::Direct(f(target)),
            EdgeValue::Conditional(condition) => EdgeValue::Conditional(EdgeCondition {
                action: condition.action.clone(),
                mappings: condition
                    .mappings
                    .iter()
                    .map(|(label, target)| (label.clone(), f(target)))
                    .collect(),
            }),
        }
    }
}

/// Outgoing edge of a node: one or more targets
///
/// More than one target makes the source a parallel fan-out.
#[derive(Clone, Debug)]
pub struct Edge {
    pub source: NodeId,
    pub targets: Vec<EdgeValue>,
}

impl Edge {
    pub fn is_parallel(&self) -> bool {
        self.targets.len() > 1
    }

    /// The single target of a non-parallel edge
    pub fn single_target(&self) -> Option<&EdgeValue> {
        if self.is_parallel() {
            None
        } else {
            self.targets.first()
        }
    }

    pub(crate) fn targets_id(&self, id: &str) -> bool {
        self.targets.iter().any(|t| t.targets_id(id))
    }
}

/// What a node does when it runs
#[derive(Clone)]
pub enum NodeKind {
    /// Plain async action
    Action(NodeActionFn),
    /// Declared nested graph, inlined at compile time
    Subgraph(StateGraph),
    /// Pre-compiled nested graph, delegated to at runtime
    CompiledSubgraph(Arc<CompiledGraph>),
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Action(_) => f.write_str("Action(<action>)"),
            NodeKind::Subgraph(_) => f.write_str("Subgraph(..)"),
            NodeKind::CompiledSubgraph(_) => f.write_str("CompiledSubgraph(..)"),
        }
    }
}

/// Declared node
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub interrupt: Option<InterruptHookFn>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("interrupt", &self.interrupt.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// Declarative workflow graph
#[derive(Clone, Default)]
pub struct StateGraph {
    pub(crate) channels: Channels,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channel_keys: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        channel_keys.sort_unstable();
        f.debug_struct("StateGraph")
            .field("channels", &channel_keys)
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .finish()
    }
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a merge channel for a state key
    pub fn add_channel(mut self, key: impl Into<String>, channel: impl Channel + 'static) -> Self {
        self.channels.insert(key.into(), Arc::new(channel));
        self
    }

    /// Registered channels
    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    fn check_node_id(&self, id: &str) -> Result<()> {
        if id.is_empty() || id == START || id == END {
            return Err(GraphError::InvalidNodeId(id.to_string()));
        }
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(GraphError::DuplicateNode(id.to_string()));
        }
        Ok(())
    }

    /// Add an action node
    pub fn add_node(mut self, id: impl Into<String>, action: NodeActionFn) -> Result<Self> {
        let id = id.into();
        self.check_node_id(&id)?;
        self.nodes.push(Node {
            id,
            kind: NodeKind::Action(action),
            interrupt: None,
        });
        Ok(self)
    }

    /// Add an action node guarded by an interrupt hook
    ///
    /// Before each execution of the node the hook inspects the current
    /// state; returning `Some` pauses the run there. Typically paired with
    /// [`CompiledGraph::update_state`](crate::compiled::CompiledGraph::update_state)
    /// to supply what the hook is waiting for, then a resume.
    pub fn add_node_with_interrupt(
        mut self,
        id: impl Into<String>,
        action: NodeActionFn,
        hook: InterruptHookFn,
    ) -> Result<Self> {
        let id = id.into();
        self.check_node_id(&id)?;
        self.nodes.push(Node {
            id,
            kind: NodeKind::Action(action),
            interrupt: Some(hook),
        });
        Ok(self)
    }

    /// Add a nested graph, inlined into this one at compile time
    pub fn add_subgraph(mut self, id: impl Into<String>, subgraph: StateGraph) -> Result<Self> {
        let id = id.into();
        self.check_node_id(&id)?;
        self.nodes.push(Node {
            id,
            kind: NodeKind::Subgraph(subgraph),
            interrupt: None,
        });
        Ok(self)
    }

    /// Add a pre-compiled graph run as a delegating node
    pub fn add_compiled_subgraph(
        mut self,
        id: impl Into<String>,
        subgraph: Arc<CompiledGraph>,
    ) -> Result<Self> {
        let id = id.into();
        self.check_node_id(&id)?;
        self.nodes.push(Node {
            id,
            kind: NodeKind::CompiledSubgraph(subgraph),
            interrupt: None,
        });
        Ok(self)
    }

    /// Add a direct edge
    ///
    /// A second direct edge from the same source declares a parallel
    /// fan-out on that source.
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let target = target.into();
        if source == END {
            return Err(GraphError::InvalidEdgeSource(source));
        }
        if target == START {
            return Err(GraphError::InvalidEdgeTarget(target));
        }
        match self.edges.iter_mut().find(|e| e.source == source) {
            Some(edge) => {
                if edge
                    .targets
                    .iter()
                    .any(|t| matches!(t, EdgeValue::Conditional(_)))
                {
                    return Err(GraphError::DuplicateEdge(source));
                }
                edge.targets.push(EdgeValue::Direct(target));
            }
            None => self.edges.push(Edge {
                source,
                targets: vec![EdgeValue::Direct(target)],
            }),
        }
        Ok(self)
    }

    /// Add a conditional edge
    ///
    /// The action's returned label is resolved through `mappings`.
    pub fn add_conditional_edges<K, V, I>(
        mut self,
        source: impl Into<String>,
        action: EdgeActionFn,
        mappings: I,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let source = source.into();
        if source == END {
            return Err(GraphError::InvalidEdgeSource(source));
        }
        let mappings: HashMap<String, NodeId> = mappings
            .into_iter()
            .map(|(label, target)| (label.into(), target.into()))
            .collect();
        if mappings.is_empty() {
            return Err(GraphError::EmptyEdgeMappings(source));
        }
        if self.edges.iter().any(|e| e.source == source) {
            return Err(GraphError::DuplicateEdge(source));
        }
        self.edges.push(Edge {
            source,
            targets: vec![EdgeValue::Conditional(EdgeCondition { action, mappings })],
        });
        Ok(self)
    }

    /// Structural validation shared by [`compile`](Self::compile)
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.edges.iter().any(|e| e.source == START) {
            return Err(GraphError::MissingEntryPoint);
        }
        let node_exists =
            |id: &str| -> bool { id == END || self.nodes.iter().any(|n| n.id == id) };
        for edge in &self.edges {
            if edge.source != START && !node_exists(&edge.source) {
                return Err(GraphError::MissingNode(edge.source.clone()));
            }
            for target in &edge.targets {
                match target {
                    EdgeValue::Direct(id) => {
                        if !node_exists(id) {
                            return Err(GraphError::UnknownEdgeTarget {
                                source_id: edge.source.clone(),
                                target: id.clone(),
                            });
                        }
                    }
                    EdgeValue::Conditional(condition) => {
                        for id in condition.mappings.values() {
                            if !node_exists(id) {
                                return Err(GraphError::UnknownEdgeTarget {
                                    source_id: edge.source.clone(),
                                    target: id.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Compile into an executable graph
    pub fn compile(self, config: CompileConfig) -> Result<CompiledGraph> {
        CompiledGraph::new(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> NodeActionFn {
        node_action(|_state| async { Ok(json!({})) })
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let result = StateGraph::new()
            .add_node("a", noop())
            .and_then(|g| g.add_node("a", noop()));
        assert!(matches!(result, Err(GraphError::DuplicateNode(id)) if id == "a"));
    }

    #[test]
    fn test_reserved_ids_rejected() {
        assert!(matches!(
            StateGraph::new().add_node(END, noop()),
            Err(GraphError::InvalidNodeId(_))
        ));
        assert!(matches!(
            StateGraph::new().add_edge(END, "a"),
            Err(GraphError::InvalidEdgeSource(_))
        ));
        assert!(matches!(
            StateGraph::new().add_edge("a", START),
            Err(GraphError::InvalidEdgeTarget(_))
        ));
    }

    #[test]
    fn test_second_direct_edge_declares_fan_out() {
        let graph = StateGraph::new()
            .add_node("a", noop())
            .unwrap()
            .add_node("b1", noop())
            .unwrap()
            .add_node("b2", noop())
            .unwrap()
            .add_edge("a", "b1")
            .unwrap()
            .add_edge("a", "b2")
            .unwrap();
        let edge = graph.edges.iter().find(|e| e.source == "a").unwrap();
        assert!(edge.is_parallel());
        assert_eq!(edge.targets.len(), 2);
    }

    #[test]
    fn test_conditional_duplicate_rejected() {
        let route = router(|_state| async { Ok("x".to_string()) });
        let result = StateGraph::new()
            .add_node("a", noop())
            .unwrap()
            .add_edge("a", "a")
            .unwrap()
            .add_conditional_edges("a", route, [("x", "a")]);
        assert!(matches!(result, Err(GraphError::DuplicateEdge(id)) if id == "a"));
    }

    #[test]
    fn test_empty_mappings_rejected() {
        let route = router(|_state| async { Ok("x".to_string()) });
        let result = StateGraph::new().add_node("a", noop()).unwrap().add_conditional_edges(
            "a",
            route,
            Vec::<(String, String)>::new(),
        );
        assert!(matches!(result, Err(GraphError::EmptyEdgeMappings(_))));
    }

    #[test]
    fn test_validate_missing_entry_point() {
        let graph = StateGraph::new().add_node("a", noop()).unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::MissingEntryPoint)));
    }

    #[test]
    fn test_graph_debug_lists_channels_and_nodes() {
        let graph = StateGraph::new()
            .add_channel("messages", graphflow_checkpoint::AppenderChannel::new())
            .add_node("a", noop())
            .unwrap()
            .add_edge(START, "a")
            .unwrap();
        let rendered = format!("{graph:?}");
        assert!(rendered.contains("StateGraph"));
        assert!(rendered.contains("messages"));
        assert!(rendered.contains("\"a\""));
    }

    #[test]
    fn test_validate_unknown_target() {
        let graph = StateGraph::new()
            .add_node("a", noop())
            .unwrap()
            .add_edge(START, "a")
            .unwrap()
            .add_edge("a", "ghost")
            .unwrap();
        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownEdgeTarget { target, .. }) if target == "ghost"
        ));
    }
}
