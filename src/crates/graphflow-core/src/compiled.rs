//! Compiled, executable graph
//!
//! Compilation validates the declared [`StateGraph`], inlines subgraphs,
//! checks the declared interrupts against the flattened node set, converts
//! nodes to runnable actions and synthesizes one node per parallel fan-out.
//! The result is two flat lookup tables (node id to action, node id to
//! outgoing edge) shared behind an `Arc`, so a compiled graph clones
//! cheaply and its step streams are `'static`.

use crate::compile::{process, CompileConfig};
use crate::config::RunnableConfig;
use crate::error::{GraphError, Result};
use crate::graph::{EdgeValue, InterruptHookFn, NodeActionFn, NodeId, NodeKind, StateGraph, START};
use crate::interrupt::InterruptionMetadata;
use crate::parallel::{parallel_action, parallel_node_id};
use crate::stream::{
    GraphInput, GraphStep, GraphStream, StateSnapshot, StepEvent, Stepper, INTERRUPT_AFTER,
};
use crate::subgraph::subgraph_node_action;
use futures::StreamExt;
use graphflow_checkpoint::channels::{
    initial_state_from_channels, update_state, ChannelWrite, Channels, PartialState, StateData,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MAX_ITERATIONS: usize = 25;

struct Inner {
    nodes: HashMap<NodeId, NodeActionFn>,
    edges: HashMap<NodeId, EdgeValue>,
    interrupt_hooks: HashMap<NodeId, InterruptHookFn>,
    channels: Channels,
    compile_config: CompileConfig,
}

/// Executable graph with flat node and edge tables
#[derive(Clone)]
pub struct CompiledGraph {
    inner: Arc<Inner>,
    max_iterations: usize,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.inner.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.inner.edges.keys().collect::<Vec<_>>())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(graph: StateGraph, config: CompileConfig) -> Result<Self> {
        graph.validate()?;
        let processed = process(&graph, &config)?;

        // interrupts must name nodes of the flattened graph
        for interrupt in processed
            .interrupts_before
            .iter()
            .chain(processed.interrupts_after.iter())
        {
            if !processed.nodes.iter().any(|n| &n.id == interrupt) {
                return Err(GraphError::UnknownInterruptionNode(interrupt.clone()));
            }
        }
        let compile_config =
            config.with_interrupts(processed.interrupts_before, processed.interrupts_after);

        let mut nodes: HashMap<NodeId, NodeActionFn> = HashMap::new();
        let mut interrupt_hooks: HashMap<NodeId, InterruptHookFn> = HashMap::new();
        for node in &processed.nodes {
            if let Some(hook) = &node.interrupt {
                interrupt_hooks.insert(node.id.clone(), hook.clone());
            }
            let action = match &node.kind {
                NodeKind::Action(action) => action.clone(),
                NodeKind::CompiledSubgraph(subgraph) => subgraph_node_action(
                    node.id.clone(),
                    subgraph.clone(),
                    compile_config.saver(),
                ),
                NodeKind::Subgraph(_) => {
                    return Err(GraphError::Custom(format!(
                        "subgraph node '{}' survived flattening",
                        node.id
                    )))
                }
            };
            nodes.insert(node.id.clone(), action);
        }

        let mut edges: HashMap<NodeId, EdgeValue> = HashMap::new();
        for edge in &processed.edges {
            if let Some(value) = edge.single_target() {
                edges.insert(edge.source.clone(), value.clone());
                continue;
            }

            // parallel fan-out: replace the multi-target edge with a
            // synthesized node running every branch
            let mut branch_ids = Vec::with_capacity(edge.targets.len());
            for target in &edge.targets {
                match target.direct_target() {
                    Some(id) => branch_ids.push(id.to_string()),
                    None => {
                        return Err(GraphError::ParallelConditionalBranch {
                            source_id: edge.source.clone(),
                            steps: branch_ids,
                        })
                    }
                }
            }

            let mut conditional_branches = Vec::new();
            let mut follow_targets: Vec<String> = Vec::new();
            for branch_id in &branch_ids {
                let branch_edge = processed
                    .edges
                    .iter()
                    .find(|e| &e.source == branch_id)
                    .ok_or_else(|| GraphError::MissingEdge(branch_id.clone()))?;
                match branch_edge.single_target() {
                    Some(EdgeValue::Direct(follow)) => {
                        if !follow_targets.contains(follow) {
                            follow_targets.push(follow.clone());
                        }
                    }
                    Some(EdgeValue::Conditional(_)) => {
                        conditional_branches.push(branch_id.clone());
                    }
                    None => {
                        for target in &branch_edge.targets {
                            if let Some(follow) = target.direct_target() {
                                if !follow_targets.contains(&follow.to_string()) {
                                    follow_targets.push(follow.to_string());
                                }
                            }
                        }
                    }
                }
            }
            if !conditional_branches.is_empty() {
                return Err(GraphError::ParallelConditionalBranch {
                    source_id: edge.source.clone(),
                    steps: conditional_branches,
                });
            }
            if follow_targets.len() != 1 {
                return Err(GraphError::ParallelMultipleTargets {
                    source_id: edge.source.clone(),
                    targets: follow_targets,
                });
            }

            let actions = branch_ids
                .iter()
                .map(|id| {
                    nodes
                        .get(id)
                        .cloned()
                        .ok_or_else(|| GraphError::MissingNode(id.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            let parallel_id = parallel_node_id(&edge.source);
            debug!(source = %edge.source, branches = branch_ids.len(), "synthesizing parallel node");
            nodes.insert(
                parallel_id.clone(),
                parallel_action(edge.source.clone(), actions, graph.channels.clone()),
            );
            edges.insert(edge.source.clone(), EdgeValue::Direct(parallel_id.clone()));
            edges.insert(
                parallel_id,
                EdgeValue::Direct(follow_targets.into_iter().next().ok_or_else(|| {
                    GraphError::MissingEdge(edge.source.clone())
                })?),
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                nodes,
                edges,
                interrupt_hooks,
                channels: graph.channels,
                compile_config,
            }),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Cap the number of transitions per run (minimum 1, default 25)
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn compile_config(&self) -> &CompileConfig {
        &self.inner.compile_config
    }

    pub fn channels(&self) -> &Channels {
        &self.inner.channels
    }

    /// Ids of the compiled nodes, synthesized ones included
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.inner.nodes.keys().map(String::as_str)
    }

    pub(crate) fn node(&self, node_id: &str) -> Option<NodeActionFn> {
        self.inner.nodes.get(node_id).cloned()
    }

    pub(crate) fn interrupt_hook(&self, node_id: &str) -> Option<InterruptHookFn> {
        self.inner.interrupt_hooks.get(node_id).cloned()
    }

    /// Resolve the outgoing edge of `node_id` against `state`
    pub(crate) async fn resolve_route(
        &self,
        node_id: &str,
        state: StateData,
        config: &RunnableConfig,
    ) -> Result<(NodeId, StateData)> {
        let route = self
            .inner
            .edges
            .get(node_id)
            .ok_or_else(|| GraphError::MissingEdge(node_id.to_string()))?
            .clone();
        self.resolve_edge_value(&route, state, node_id, config).await
    }

    pub(crate) async fn resolve_edge_value(
        &self,
        route: &EdgeValue,
        state: StateData,
        node_id: &str,
        config: &RunnableConfig,
    ) -> Result<(NodeId, StateData)> {
        match route {
            EdgeValue::Direct(target) => Ok((target.clone(), state)),
            EdgeValue::Conditional(condition) => {
                let command = (condition.action)(state.clone(), config.clone())
                    .await
                    .map_err(|e| GraphError::edge_execution(node_id, e))?;
                let label = command.goto.ok_or_else(|| GraphError::MissingEdgeMapping {
                    source_id: node_id.to_string(),
                    mapping: "<none>".to_string(),
                })?;
                let target = condition
                    .mappings
                    .get(&label)
                    .ok_or_else(|| GraphError::MissingEdgeMapping {
                        source_id: node_id.to_string(),
                        mapping: label.clone(),
                    })?
                    .clone();
                let state = update_state(state, command.update, self.channels())?;
                Ok((target, state))
            }
        }
    }

    pub(crate) fn should_interrupt_before(
        &self,
        node_id: Option<&str>,
        previous: Option<&str>,
    ) -> bool {
        // a fresh resume has no previous node; interrupt-before already
        // fired for it
        let (Some(node_id), Some(_)) = (node_id, previous) else {
            return false;
        };
        self.compile_config().interrupts_before().contains(node_id)
    }

    pub(crate) fn should_interrupt_after(
        &self,
        node_id: Option<&str>,
        previous: Option<&str>,
    ) -> bool {
        let Some(node_id) = node_id else {
            return false;
        };
        if Some(node_id) == previous {
            return false;
        }
        (self.compile_config().interrupt_before_edge() && node_id == INTERRUPT_AFTER)
            || self.compile_config().interrupts_after().contains(node_id)
    }

    /// Initial state of a run: the thread's saved state (when a saver is
    /// configured) or the channel defaults, merged with the input values
    pub(crate) async fn initial_state(
        &self,
        inputs: StateData,
        config: &RunnableConfig,
    ) -> Result<StateData> {
        let saved = match self.compile_config().saver() {
            Some(saver) => saver
                .get(&config.checkpoint_config())
                .await?
                .map(|checkpoint| checkpoint.state),
            None => None,
        };
        let base = saved.unwrap_or_else(|| initial_state_from_channels(self.channels()));
        let writes: PartialState = inputs
            .into_iter()
            .map(|(key, value)| (key, ChannelWrite::from(value)))
            .collect();
        Ok(update_state(base, writes, self.channels())?)
    }

    /// Run the graph, emitting one [`GraphStep`] per transition
    pub fn stream(&self, input: impl Into<GraphInput>, config: RunnableConfig) -> GraphStream {
        let graph = self.clone();
        let input = input.into();
        Box::pin(async_stream::stream! {
            let mut stepper = match Stepper::new(graph, input, config).await {
                Ok(stepper) => stepper,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            loop {
                match stepper.next().await {
                    Ok(StepEvent::Output(output)) => yield Ok(GraphStep::Output(output)),
                    Ok(StepEvent::Interruption(metadata)) => {
                        yield Ok(GraphStep::Interruption(metadata));
                        break;
                    }
                    Ok(StepEvent::Done) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    /// Run to completion and return the final state
    ///
    /// Returns `Ok(None)` when the run pauses on an interrupt before
    /// producing any output.
    pub async fn invoke(
        &self,
        input: impl Into<GraphInput>,
        config: RunnableConfig,
    ) -> Result<Option<StateData>> {
        let mut stream = self.stream(input, config);
        let mut last = None;
        while let Some(step) = stream.next().await {
            match step? {
                GraphStep::Output(output) => last = Some(output.state),
                GraphStep::Interruption(_) => break,
            }
        }
        Ok(last)
    }

    /// Run to completion and return the interruption, if one fired
    pub async fn invoke_with_interrupt(
        &self,
        input: impl Into<GraphInput>,
        config: RunnableConfig,
    ) -> Result<(Option<StateData>, Option<InterruptionMetadata>)> {
        let mut stream = self.stream(input, config);
        let mut last = None;
        while let Some(step) = stream.next().await {
            match step? {
                GraphStep::Output(output) => last = Some(output.state),
                GraphStep::Interruption(metadata) => return Ok((last, Some(metadata))),
            }
        }
        Ok((last, None))
    }

    /// Snapshots of the thread's checkpoints, most recent first
    pub async fn state_history(&self, config: &RunnableConfig) -> Result<Vec<StateSnapshot>> {
        let saver = self
            .compile_config()
            .saver()
            .ok_or(GraphError::MissingSaver)?;
        let checkpoints = saver.list(&config.checkpoint_config()).await?;
        Ok(checkpoints
            .iter()
            .map(|checkpoint| StateSnapshot::from_checkpoint(checkpoint, config))
            .collect())
    }

    /// Snapshot of the addressed checkpoint (or the thread's latest)
    pub async fn state_of(&self, config: &RunnableConfig) -> Result<Option<StateSnapshot>> {
        let saver = self
            .compile_config()
            .saver()
            .ok_or(GraphError::MissingSaver)?;
        Ok(saver
            .get(&config.checkpoint_config())
            .await?
            .map(|checkpoint| StateSnapshot::from_checkpoint(&checkpoint, config)))
    }

    /// Like [`state_of`](Self::state_of), erroring when nothing is saved
    pub async fn get_state(&self, config: &RunnableConfig) -> Result<StateSnapshot> {
        self.state_of(config).await?.ok_or(GraphError::MissingCheckpoint)
    }

    /// The most recent snapshot of the thread
    pub async fn last_state(&self, config: &RunnableConfig) -> Result<Option<StateSnapshot>> {
        Ok(self.state_history(config).await?.into_iter().next())
    }

    /// Fork the addressed checkpoint with new values
    ///
    /// The fork gets a fresh id and lands at the front of the thread, so a
    /// subsequent resume continues from it. With `as_node`, that node's
    /// outgoing edge is resolved against the forked state and recorded as
    /// the returned config's `next_node`.
    pub async fn update_state(
        &self,
        config: &RunnableConfig,
        values: PartialState,
        as_node: Option<&str>,
    ) -> Result<RunnableConfig> {
        let saver = self
            .compile_config()
            .saver()
            .ok_or(GraphError::MissingSaver)?;
        let checkpoint = saver
            .get(&config.checkpoint_config())
            .await?
            .ok_or(GraphError::MissingCheckpoint)?;

        let mut fork = checkpoint
            .copy_with_new_id()
            .update_state(values, self.channels())?;
        let mut next_node = None;
        if let Some(as_node) = as_node {
            let (next, state) = self
                .resolve_route(as_node, fork.state.clone(), config)
                .await?;
            fork.state = state;
            fork.next_node_id = Some(next.clone());
            next_node = Some(next);
        }
        debug!(fork_id = %fork.id, as_node = ?as_node, "forking checkpoint");

        let written = saver.put(&config.checkpoint_config(), fork.clone()).await?;
        let mut forked_config = config.clone();
        forked_config.thread_id = written.thread_id.or_else(|| config.thread_id.clone());
        forked_config.checkpoint_id = Some(fork.id);
        forked_config.next_node = next_node;
        Ok(forked_config)
    }

    /// Resolve the entry edge against `state` without running anything
    pub async fn entry_point(
        &self,
        state: StateData,
        config: &RunnableConfig,
    ) -> Result<(NodeId, StateData)> {
        self.resolve_route(START, state, config).await
    }
}
