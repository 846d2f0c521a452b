//! Step stream and the stepper driving it
//!
//! A compiled graph executes as a pull-based stream of [`GraphStep`]s. Each
//! pull advances the stepper by one transition: resolve the entry edge, run
//! a node, drain an embedded sub-graph, or fire an interrupt. The stream
//! terminates after END, after an [`Interruption`](GraphStep::Interruption),
//! or with an error.

use crate::compiled::CompiledGraph;
use crate::config::{RunnableConfig, StreamMode};
use crate::error::{GraphError, Result};
use crate::graph::{NodeId, END, START};
use crate::interrupt::InterruptionMetadata;
use crate::node_result::{EmbedItem, EmbedStream, NodeResult};
use futures::stream::Stream;
use futures::StreamExt;
use graphflow_checkpoint::channels::{update_state, PartialState, StateData};
use graphflow_checkpoint::Checkpoint;
use serde_json::Value;
use std::pin::Pin;
use tracing::{debug, trace};

/// Sentinel target parked on the cursor when interrupt-before-edge defers
/// the interrupted node's edge to resume time
pub(crate) const INTERRUPT_AFTER: &str = "__INTERRUPTED__";

/// Input of a run
#[derive(Debug, Clone)]
pub enum GraphInput {
    /// Start a run with these initial values
    Args(StateData),
    /// Resume the thread from its saved checkpoint
    Resume,
}

impl GraphInput {
    /// Initial values from a JSON object (anything else starts empty)
    pub fn args(value: Value) -> Self {
        match value {
            Value::Object(map) => GraphInput::Args(map.into_iter().collect()),
            _ => GraphInput::Args(StateData::new()),
        }
    }

    /// Start with no initial values
    pub fn empty() -> Self {
        GraphInput::Args(StateData::new())
    }

    pub fn resume() -> Self {
        GraphInput::Resume
    }
}

impl From<Value> for GraphInput {
    fn from(value: Value) -> Self {
        GraphInput::args(value)
    }
}

impl From<StateData> for GraphInput {
    fn from(state: StateData) -> Self {
        GraphInput::Args(state)
    }
}

/// Addressed view of one checkpoint, exposed by the state APIs and by
/// [`StreamMode::Snapshots`]
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Node that produced the checkpoint
    pub node_id: Option<String>,
    /// State at the checkpoint
    pub state: StateData,
    /// Node scheduled after the checkpoint
    pub next_node: Option<String>,
    /// Config addressing exactly this checkpoint
    pub config: RunnableConfig,
}

impl StateSnapshot {
    pub(crate) fn from_checkpoint(checkpoint: &Checkpoint, config: &RunnableConfig) -> Self {
        Self {
            node_id: checkpoint.node_id.clone(),
            state: checkpoint.state.clone(),
            next_node: checkpoint.next_node_id.clone(),
            config: config.clone().with_checkpoint_id(checkpoint.id.clone()),
        }
    }
}

/// One emitted step
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Node that produced this step (START and END are emitted too)
    pub node_id: NodeId,
    /// State after the step
    pub state: StateData,
    /// True when the step comes from an embedded sub-graph
    pub sub_graph: bool,
    /// Snapshot of the step's checkpoint, in [`StreamMode::Snapshots`]
    pub snapshot: Option<StateSnapshot>,
}

/// Item of the step stream
#[derive(Debug)]
pub enum GraphStep {
    /// A node produced output
    Output(StepOutput),
    /// Execution paused on a declared interrupt; terminal
    Interruption(InterruptionMetadata),
}

/// Boxed step stream returned by [`CompiledGraph::stream`]
pub type GraphStream = Pin<Box<dyn Stream<Item = Result<GraphStep>> + Send + 'static>>;

/// Where the stepper is between two pulls
#[derive(Debug, Clone, Default)]
pub(crate) struct Cursor {
    /// Node whose output was just emitted
    pub current: Option<NodeId>,
    /// Node scheduled to run next
    pub next: Option<NodeId>,
    /// Node a resumed run is unwinding from
    pub resume_from: Option<NodeId>,
}

impl Cursor {
    fn start() -> Self {
        Self {
            current: Some(START.to_string()),
            next: None,
            resume_from: None,
        }
    }

    fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            current: None,
            next: checkpoint.next_node_id.clone(),
            resume_from: checkpoint.node_id.clone(),
        }
    }

    fn reset(&mut self) {
        self.current = None;
        self.next = None;
        self.resume_from = None;
    }
}

/// What one pull of the stepper produced
pub(crate) enum StepEvent {
    Output(StepOutput),
    Interruption(InterruptionMetadata),
    Done,
}

/// Pull-based execution engine over a compiled graph
pub(crate) struct Stepper {
    graph: CompiledGraph,
    config: RunnableConfig,
    state: StateData,
    cursor: Cursor,
    iterations: usize,
    embed: Option<EmbedStream>,
    embed_update: PartialState,
    return_from_embed: bool,
}

impl Stepper {
    pub(crate) async fn new(
        graph: CompiledGraph,
        input: GraphInput,
        config: RunnableConfig,
    ) -> Result<Self> {
        let (state, cursor, config) = match input {
            GraphInput::Resume => {
                let saver = graph
                    .compile_config()
                    .saver()
                    .ok_or(GraphError::MissingSaver)?;
                let checkpoint = saver
                    .get(&config.checkpoint_config())
                    .await?
                    .ok_or(GraphError::MissingCheckpoint)?;
                debug!(
                    node_id = ?checkpoint.node_id,
                    next_node_id = ?checkpoint.next_node_id,
                    "resuming from checkpoint"
                );
                let cursor = Cursor::from_checkpoint(&checkpoint);
                // the addressed checkpoint is consumed; new checkpoints go
                // to the front of the thread
                let mut config = config;
                config.checkpoint_id = None;
                (checkpoint.state, cursor, config)
            }
            GraphInput::Args(inputs) => {
                let state = graph.initial_state(inputs, &config).await?;
                debug!(keys = state.len(), "starting run");
                (state, Cursor::start(), config)
            }
        };
        Ok(Self {
            graph,
            config,
            state,
            cursor,
            iterations: 0,
            embed: None,
            embed_update: PartialState::new(),
            return_from_embed: false,
        })
    }

    /// Advance by one transition
    pub(crate) async fn next(&mut self) -> Result<StepEvent> {
        loop {
            // an embedded sub-graph drains before anything else, without
            // counting against the iteration guard
            if self.embed.is_some() {
                match self.pull_embed().await? {
                    Some(event) => return Ok(event),
                    None => continue,
                }
            }

            self.iterations += 1;
            if self.iterations > self.graph.max_iterations() {
                return Err(GraphError::MaxIterationsReached(self.graph.max_iterations()));
            }

            if self.cursor.current.is_none() && self.cursor.next.is_none() {
                self.release_thread().await?;
                return Ok(StepEvent::Done);
            }

            if self.return_from_embed {
                self.return_from_embed = false;
                let output = self.node_output().await?;
                return Ok(StepEvent::Output(output));
            }

            if self.cursor.current.as_deref() == Some(START) {
                let (next, state) = self
                    .graph
                    .resolve_route(START, std::mem::take(&mut self.state), &self.config)
                    .await?;
                self.state = state;
                self.cursor.next = Some(next);
                let checkpoint = self.add_checkpoint(START).await?;
                let output = self.build_output(START, checkpoint);
                self.cursor.current = self.cursor.next.clone();
                return Ok(StepEvent::Output(output));
            }

            if self.cursor.next.as_deref() == Some(END) {
                self.cursor.reset();
                return Ok(StepEvent::Output(self.build_output(END, None)));
            }

            if let Some(resume_from) = self.cursor.resume_from.take() {
                // deferred-edge resume: the interrupted node's edge was
                // never resolved, do it now from the saved node
                if self.graph.compile_config().interrupt_before_edge()
                    && self.cursor.next.as_deref() == Some(INTERRUPT_AFTER)
                {
                    trace!(node_id = %resume_from, "resolving deferred edge on resume");
                    let (next, state) = self
                        .graph
                        .resolve_route(&resume_from, std::mem::take(&mut self.state), &self.config)
                        .await?;
                    self.state = state;
                    self.cursor.next = Some(next);
                    self.cursor.current = None;
                }
            }

            if self
                .graph
                .should_interrupt_after(self.cursor.current.as_deref(), self.cursor.next.as_deref())
            {
                debug!(node_id = ?self.cursor.current, "interrupt after node");
                return Ok(StepEvent::Interruption(InterruptionMetadata::new(
                    self.cursor.current.clone(),
                    self.state.clone(),
                )));
            }
            if self
                .graph
                .should_interrupt_before(self.cursor.next.as_deref(), self.cursor.current.as_deref())
            {
                debug!(node_id = ?self.cursor.next, "interrupt before node");
                return Ok(StepEvent::Interruption(InterruptionMetadata::new(
                    self.cursor.current.clone(),
                    self.state.clone(),
                )));
            }

            let node_id = self
                .cursor
                .next
                .clone()
                .ok_or_else(|| GraphError::MissingNode("<unset>".to_string()))?;

            // per-node hook: re-evaluated on every arrival, so a resume
            // after an update_state fork passes once the state satisfies it
            if let Some(hook) = self.graph.interrupt_hook(&node_id) {
                if let Some(metadata) = hook(&node_id, &self.state) {
                    debug!(node_id = %node_id, "node interrupt hook fired");
                    return Ok(StepEvent::Interruption(metadata));
                }
            }
            self.cursor.current = Some(node_id.clone());

            let action = self
                .graph
                .node(&node_id)
                .ok_or_else(|| GraphError::MissingNode(node_id.clone()))?;
            trace!(node_id = %node_id, iteration = self.iterations, "executing node");
            let result = action(self.state.clone(), self.config.clone())
                .await
                .map_err(|e| GraphError::node_execution(&node_id, e))?;

            match result {
                NodeResult::Deferred { stream, update } => {
                    self.embed = Some(stream);
                    self.embed_update = update;
                    // drained at the top of the next loop pass
                }
                NodeResult::Update(update) => {
                    self.state = update_state(
                        std::mem::take(&mut self.state),
                        update,
                        self.graph.channels(),
                    )?;
                    if self.graph.compile_config().interrupt_before_edge()
                        && self.graph.compile_config().interrupts_after().contains(&node_id)
                    {
                        // park the edge; it resolves on resume
                        self.cursor.next = Some(INTERRUPT_AFTER.to_string());
                    } else {
                        let (next, state) = self
                            .graph
                            .resolve_route(&node_id, std::mem::take(&mut self.state), &self.config)
                            .await?;
                        self.state = state;
                        self.cursor.next = Some(next);
                    }
                    let output = self.node_output().await?;
                    return Ok(StepEvent::Output(output));
                }
            }
        }
    }

    /// Pull one item of the embedded stream
    ///
    /// `None` means the pull changed stepper state without producing an
    /// event, and the outer loop should continue.
    async fn pull_embed(&mut self) -> Result<Option<StepEvent>> {
        let item = match self.embed.as_mut() {
            Some(embed) => embed.next().await,
            None => None,
        };
        match item {
            Some(Ok(EmbedItem::Step(GraphStep::Output(mut output)))) => {
                output.sub_graph = true;
                Ok(Some(StepEvent::Output(output)))
            }
            Some(Ok(EmbedItem::Step(GraphStep::Interruption(metadata)))) => {
                self.embed = None;
                Ok(Some(StepEvent::Interruption(metadata)))
            }
            Some(Ok(EmbedItem::Done(terminal))) => {
                self.embed = None;
                self.finish_embed(terminal).await?;
                Ok(None)
            }
            Some(Err(e)) => {
                self.embed = None;
                Err(e)
            }
            None => {
                self.embed = None;
                self.finish_embed(PartialState::new()).await?;
                Ok(None)
            }
        }
    }

    /// Fold the embedded updates and schedule the delegating node's output
    async fn finish_embed(&mut self, terminal: PartialState) -> Result<()> {
        let pending = std::mem::take(&mut self.embed_update);
        let state = update_state(
            std::mem::take(&mut self.state),
            pending,
            self.graph.channels(),
        )?;
        let state = update_state(state, terminal, self.graph.channels())?;
        let current = self
            .cursor
            .current
            .clone()
            .ok_or_else(|| GraphError::MissingNode("<unset>".to_string()))?;
        let (next, state) = self.graph.resolve_route(&current, state, &self.config).await?;
        self.state = state;
        self.cursor.next = Some(next);
        self.return_from_embed = true;
        Ok(())
    }

    /// Checkpoint and emit the current node's output
    async fn node_output(&mut self) -> Result<StepOutput> {
        let node_id = self
            .cursor
            .current
            .clone()
            .ok_or_else(|| GraphError::MissingNode("<unset>".to_string()))?;
        let checkpoint = self.add_checkpoint(&node_id).await?;
        Ok(self.build_output(&node_id, checkpoint))
    }

    async fn add_checkpoint(&mut self, node_id: &str) -> Result<Option<Checkpoint>> {
        let saver = match self.graph.compile_config().saver() {
            Some(saver) => saver,
            None => return Ok(None),
        };
        let mut checkpoint = Checkpoint::new(self.state.clone()).with_node_id(node_id);
        if let Some(next) = &self.cursor.next {
            checkpoint = checkpoint.with_next_node_id(next);
        }
        saver
            .put(&self.config.checkpoint_config(), checkpoint.clone())
            .await?;
        trace!(node_id = %node_id, checkpoint_id = %checkpoint.id, "checkpoint written");
        Ok(Some(checkpoint))
    }

    fn build_output(&self, node_id: &str, checkpoint: Option<Checkpoint>) -> StepOutput {
        let snapshot = match (checkpoint, self.config.stream_mode) {
            (Some(checkpoint), StreamMode::Snapshots) => {
                Some(StateSnapshot::from_checkpoint(&checkpoint, &self.config))
            }
            _ => None,
        };
        StepOutput {
            node_id: node_id.to_string(),
            state: self.state.clone(),
            sub_graph: false,
            snapshot,
        }
    }

    async fn release_thread(&mut self) -> Result<()> {
        let compile_config = self.graph.compile_config();
        if !compile_config.release_thread() {
            return Ok(());
        }
        if let Some(saver) = compile_config.saver() {
            let tag = saver.release(&self.config.checkpoint_config()).await?;
            debug!(
                thread_id = %tag.thread_id,
                checkpoints = tag.checkpoints.len(),
                "thread released"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_input_from_object() {
        let input = GraphInput::args(json!({"k": 1}));
        match input {
            GraphInput::Args(state) => assert_eq!(state["k"], json!(1)),
            _ => panic!("expected args"),
        }
    }

    #[test]
    fn test_graph_input_from_non_object_is_empty() {
        match GraphInput::args(json!(42)) {
            GraphInput::Args(state) => assert!(state.is_empty()),
            _ => panic!("expected args"),
        }
    }

    #[test]
    fn test_cursor_from_checkpoint() {
        let checkpoint = Checkpoint::new(StateData::new())
            .with_node_id("a")
            .with_next_node_id("b");
        let cursor = Cursor::from_checkpoint(&checkpoint);
        assert_eq!(cursor.current, None);
        assert_eq!(cursor.next.as_deref(), Some("b"));
        assert_eq!(cursor.resume_from.as_deref(), Some("a"));
    }

    #[test]
    fn test_snapshot_addresses_checkpoint() {
        let checkpoint = Checkpoint::new(StateData::new()).with_node_id("a");
        let config = RunnableConfig::new().with_thread_id("t1");
        let snapshot = StateSnapshot::from_checkpoint(&checkpoint, &config);
        assert_eq!(snapshot.config.checkpoint_id.as_deref(), Some(checkpoint.id.as_str()));
        assert_eq!(snapshot.config.thread_id.as_deref(), Some("t1"));
    }
}
