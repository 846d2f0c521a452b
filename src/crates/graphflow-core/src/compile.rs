//! Compile configuration and subgraph flattening
//!
//! [`CompileConfig`] fixes the execution-time collaborators of a compiled
//! graph: the checkpoint saver, the declared interrupts and the
//! thread-release policy.
//!
//! [`process`] performs the structural half of compilation: every declared
//! subgraph node is inlined into the parent, with child ids renamed
//! `"{parent_id}_{child_id}"`, and the declared interrupts are remapped to
//! the flattened node set.

use crate::error::{GraphError, Result};
use crate::graph::{Edge, EdgeValue, Node, NodeKind, StateGraph, START};
use graphflow_checkpoint::traits::CheckpointSaver;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Compile-time configuration
#[derive(Clone, Default)]
pub struct CompileConfig {
    saver: Option<Arc<dyn CheckpointSaver>>,
    interrupts_before: HashSet<String>,
    interrupts_after: HashSet<String>,
    interrupt_before_edge: bool,
    release_thread: bool,
}

impl std::fmt::Debug for CompileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileConfig")
            .field("saver", &self.saver.as_ref().map(|_| "<saver>"))
            .field("interrupts_before", &self.interrupts_before)
            .field("interrupts_after", &self.interrupts_after)
            .field("interrupt_before_edge", &self.interrupt_before_edge)
            .field("release_thread", &self.release_thread)
            .finish()
    }
}

impl CompileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint after every step through this saver
    pub fn with_saver(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    /// Pause before the named nodes execute
    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupts_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Pause after the named nodes execute
    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupts_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Evaluate interrupt-after before resolving the interrupted node's edge
    ///
    /// The edge is then resolved on resume instead.
    pub fn with_interrupt_before_edge(mut self, value: bool) -> Self {
        self.interrupt_before_edge = value;
        self
    }

    /// Release the checkpoint thread when a run completes
    pub fn with_release_thread(mut self, value: bool) -> Self {
        self.release_thread = value;
        self
    }

    pub fn saver(&self) -> Option<Arc<dyn CheckpointSaver>> {
        self.saver.clone()
    }

    pub fn interrupts_before(&self) -> &HashSet<String> {
        &self.interrupts_before
    }

    pub fn interrupts_after(&self) -> &HashSet<String> {
        &self.interrupts_after
    }

    pub fn interrupt_before_edge(&self) -> bool {
        self.interrupt_before_edge
    }

    pub fn release_thread(&self) -> bool {
        self.release_thread
    }

    /// Replace the interrupt sets with their flattened counterparts
    pub(crate) fn with_interrupts(
        mut self,
        before: HashSet<String>,
        after: HashSet<String>,
    ) -> Self {
        self.interrupts_before = before;
        self.interrupts_after = after;
        self
    }
}

/// Flattened node id of `child` inlined under `parent`
pub(crate) fn format_id(parent: &str, child: &str) -> String {
    format!("{parent}_{child}")
}

/// Nodes, edges and interrupts after subgraph flattening
pub(crate) struct ProcessedGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub interrupts_before: HashSet<String>,
    pub interrupts_after: HashSet<String>,
}

/// Inline every declared subgraph into the parent graph
pub(crate) fn process(graph: &StateGraph, config: &CompileConfig) -> Result<ProcessedGraph> {
    let mut interrupts_before = config.interrupts_before.clone();
    let mut interrupts_after = config.interrupts_after.clone();

    let (subgraphs, mut nodes): (Vec<_>, Vec<_>) = graph
        .nodes
        .iter()
        .cloned()
        .partition(|n| matches!(n.kind, NodeKind::Subgraph(_)));
    let mut edges = graph.edges.clone();

    for subgraph_node in subgraphs {
        let sg_id = subgraph_node.id;
        let child = match subgraph_node.kind {
            NodeKind::Subgraph(child) => child,
            _ => unreachable!("partitioned on subgraph kind"),
        };
        debug!(subgraph = %sg_id, "inlining subgraph");

        // nested subgraphs flatten bottom-up
        child.validate()?;
        let child = process(&child, &CompileConfig::new())?;

        // entry edge of the child
        let entry = child
            .edges
            .iter()
            .find(|e| e.source == START)
            .ok_or(GraphError::MissingEntryPoint)?;
        if entry.is_parallel() {
            return Err(GraphError::SubgraphParallelEntry(sg_id));
        }
        let entry_target = entry
            .single_target()
            .and_then(EdgeValue::direct_target)
            .ok_or_else(|| GraphError::SubgraphConditionalEntry(sg_id.clone()))?;
        let renamed_entry = format_id(&sg_id, entry_target);

        // interrupt-before on the subgraph moves to its entry node
        if interrupts_before.remove(&sg_id) {
            interrupts_before.insert(renamed_entry.clone());
        }

        // retarget every edge pointing at the subgraph node
        let mut targeted = false;
        for edge in edges.iter_mut() {
            if edge.targets_id(&sg_id) {
                targeted = true;
                let retargeted: Vec<_> = edge
                    .targets
                    .iter()
                    .map(|t| {
                        t.map_targets(|id| {
                            if id == sg_id {
                                renamed_entry.clone()
                            } else {
                                id.to_string()
                            }
                        })
                    })
                    .collect();
                edge.targets = retargeted;
            }
        }
        if !targeted {
            return Err(GraphError::SubgraphNotATarget(sg_id));
        }

        // outgoing edge of the subgraph node
        let exit_position = edges
            .iter()
            .position(|e| e.source == sg_id)
            .ok_or_else(|| GraphError::MissingEdge(sg_id.clone()))?;
        let exit_edge = edges.remove(exit_position);
        if exit_edge.is_parallel() {
            return Err(GraphError::SubgraphParallelExit(sg_id));
        }
        let exit_value = exit_edge.targets.into_iter().next().ok_or_else(|| {
            GraphError::MissingEdge(sg_id.clone())
        })?;

        if interrupts_after.contains(&sg_id) {
            return Err(match exit_value.direct_target() {
                Some(successor) => GraphError::InterruptAfterSubgraphWithSuccessor {
                    node: sg_id,
                    successor: successor.to_string(),
                },
                None => GraphError::InterruptAfterSubgraph(sg_id),
            });
        }

        // splice child edges: END edges pick up the parent's exit, the rest
        // are renamed verbatim
        for child_edge in child.edges {
            if child_edge.source == START {
                continue;
            }
            let source = format_id(&sg_id, &child_edge.source);
            if child_edge.targets_id(crate::graph::END) {
                let mut targets = Vec::with_capacity(child_edge.targets.len());
                for target in &child_edge.targets {
                    targets.push(splice_exit_target(target, &sg_id, &exit_value)?);
                }
                edges.push(Edge { source, targets });
            } else {
                let targets = child_edge
                    .targets
                    .iter()
                    .map(|t| t.map_targets(|id| format_id(&sg_id, id)))
                    .collect();
                edges.push(Edge { source, targets });
            }
        }

        // splice child nodes under renamed ids
        for child_node in child.nodes {
            let renamed = format_id(&sg_id, &child_node.id);
            if nodes.iter().any(|n| n.id == renamed) {
                return Err(GraphError::DuplicateNode(renamed));
            }
            nodes.push(Node {
                id: renamed,
                kind: child_node.kind,
                interrupt: child_node.interrupt,
            });
        }
    }

    Ok(ProcessedGraph {
        nodes,
        edges,
        interrupts_before,
        interrupts_after,
    })
}

/// Rewrite one child END-edge target to leave through the parent's exit
fn splice_exit_target(
    target: &EdgeValue,
    sg_id: &str,
    exit_value: &EdgeValue,
) -> Result<EdgeValue> {
    match target {
        EdgeValue::Direct(id) if id == crate::graph::END => Ok(exit_value.clone()),
        EdgeValue::Direct(id) => Ok(EdgeValue::Direct(format_id(sg_id, id))),
        EdgeValue::Conditional(_) => {
            // a conditional child exit can only splice onto a nameable
            // parent successor
            let successor = exit_value.direct_target().ok_or_else(|| {
                GraphError::Custom(format!(
                    "subgraph '{sg_id}' has a conditional exit and a conditional successor; one of them must be a direct edge"
                ))
            })?;
            Ok(target.map_targets(|id| {
                if id == crate::graph::END {
                    successor.to_string()
                } else {
                    format_id(sg_id, id)
                }
            }))
        }
    }
}
