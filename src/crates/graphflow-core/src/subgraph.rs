//! Subgraph delegation nodes
//!
//! A pre-compiled graph added with
//! [`add_compiled_subgraph`](crate::graph::StateGraph::add_compiled_subgraph)
//! becomes an ordinary action that defers to the child graph: the child's
//! steps surface through the parent stream flagged `sub_graph`, and the
//! child's final state becomes the delegating node's effective update.
//!
//! When parent and child share the same saver instance the child runs under
//! the derived thread id `"{parent_thread}_subgraph_{node_id}"`, and a
//! truthy `"resume_subgraph_{node_id}"` metadata entry on the run config
//! resumes the child instead of starting it fresh.

use crate::compiled::CompiledGraph;
use crate::config::RunnableConfig;
use crate::error::BoxError;
use crate::graph::{NodeActionFn, NodeId};
use crate::node_result::{EmbedItem, NodeResult};
use crate::stream::{GraphInput, GraphStep};
use futures::StreamExt;
use graphflow_checkpoint::channels::{ChannelWrite, PartialState, StateData};
use graphflow_checkpoint::traits::CheckpointSaver;
use std::sync::Arc;
use tracing::debug;

/// Metadata key controlling resume of the subgraph under `node_id`
pub fn resume_subgraph_key(node_id: &str) -> String {
    format!("resume_subgraph_{node_id}")
}

fn derived_thread_id(parent_thread: &str, node_id: &str) -> String {
    format!("{parent_thread}_subgraph_{node_id}")
}

/// Build the delegating action for a compiled subgraph node
pub(crate) fn subgraph_node_action(
    node_id: NodeId,
    subgraph: Arc<CompiledGraph>,
    parent_saver: Option<Arc<dyn CheckpointSaver>>,
) -> NodeActionFn {
    Arc::new(move |state: StateData, config: RunnableConfig| {
        let node_id = node_id.clone();
        let subgraph = subgraph.clone();
        let parent_saver = parent_saver.clone();
        Box::pin(async move {
            let child_saver = subgraph.compile_config().saver();

            let mut child_config = config.clone();
            let mut resume = false;

            if let Some(child_saver) = child_saver {
                let parent_saver = parent_saver.ok_or_else(|| -> BoxError {
                    "missing checkpoint saver in parent graph".into()
                })?;
                if Arc::ptr_eq(&child_saver, &parent_saver) {
                    // shared saver: the child gets its own thread slice
                    let parent_thread = config
                        .checkpoint_config()
                        .thread_id_or_default()
                        .to_string();
                    child_config = child_config
                        .with_thread_id(derived_thread_id(&parent_thread, &node_id));
                    resume = config
                        .metadata(&resume_subgraph_key(&node_id))
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                }
            }

            let input = if resume {
                debug!(node_id = %node_id, "resuming subgraph");
                GraphInput::Resume
            } else {
                GraphInput::Args(state)
            };

            let stream: crate::node_result::EmbedStream =
                Box::pin(async_stream::try_stream! {
                    let mut inner = subgraph.stream(input, child_config);
                    let mut final_state = StateData::new();
                    while let Some(step) = inner.next().await {
                        match step? {
                            GraphStep::Output(output) => {
                                final_state = output.state.clone();
                                yield EmbedItem::Step(GraphStep::Output(output));
                            }
                            GraphStep::Interruption(metadata) => {
                                yield EmbedItem::Step(GraphStep::Interruption(metadata));
                            }
                        }
                    }
                    // replace writes: the child already merged through the
                    // shared channels, re-appending would duplicate
                    let update: PartialState = final_state
                        .into_iter()
                        .map(|(key, value)| (key, ChannelWrite::Replace(value)))
                        .collect();
                    yield EmbedItem::Done(update);
                });

            Ok(NodeResult::deferred(stream))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_thread_id_format() {
        assert_eq!(derived_thread_id("t1", "child"), "t1_subgraph_child");
        assert_eq!(resume_subgraph_key("child"), "resume_subgraph_child");
    }
}
