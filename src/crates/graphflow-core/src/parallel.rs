//! Parallel fan-out nodes
//!
//! When a source declares several direct targets, the compiler replaces the
//! fan-out with a single synthesized node that runs every branch action over
//! the same input state and folds the results back together.
//!
//! Branches run concurrently when the run config registers a
//! [`TaskExecutor`](crate::config::TaskExecutor) under the *source* node id,
//! sequentially otherwise. Either way the fan-in fold happens in declared
//! branch order, so the merged result never depends on completion order.

use crate::config::RunnableConfig;
use crate::error::BoxError;
use crate::graph::{NodeActionFn, NodeId};
use crate::node_result::{EmbedItem, NodeResult};
use futures::StreamExt;
use graphflow_checkpoint::channels::{update_state, ChannelWrite, Channels, PartialState, StateData};
use tracing::trace;

/// Id of the node synthesized for a fan-out on `source`
pub fn parallel_node_id(source: &str) -> String {
    format!("__PARALLEL__({source})")
}

/// A branch result, flattened to the sequence of updates it contributes
async fn drain_branch(result: NodeResult) -> Result<Vec<PartialState>, BoxError> {
    match result {
        NodeResult::Update(update) => Ok(vec![update]),
        NodeResult::Deferred { mut stream, update } => {
            // intermediate steps of an embedded stream are not observable
            // through a fan-out branch; only its terminal update counts
            let mut updates = vec![update];
            while let Some(item) = stream.next().await {
                if let EmbedItem::Done(terminal) = item? {
                    updates.push(terminal);
                }
            }
            Ok(updates)
        }
    }
}

/// Build the synthesized action for a fan-out on `source`
pub(crate) fn parallel_action(
    source: NodeId,
    actions: Vec<NodeActionFn>,
    channels: Channels,
) -> NodeActionFn {
    std::sync::Arc::new(move |state: StateData, config: RunnableConfig| {
        let source = source.clone();
        let actions = actions.clone();
        let channels = channels.clone();
        Box::pin(async move {
            let mut branch_results: Vec<Vec<PartialState>> = Vec::with_capacity(actions.len());

            match config.executor(&source) {
                Some(executor) => {
                    trace!(source = %source, branches = actions.len(), "parallel fan-out (executor)");
                    let mut receivers = Vec::with_capacity(actions.len());
                    for action in &actions {
                        let (tx, rx) = tokio::sync::oneshot::channel();
                        let fut = action(state.clone(), config.clone());
                        executor.spawn(Box::pin(async move {
                            let _ = tx.send(fut.await);
                        }));
                        receivers.push(rx);
                    }
                    // receive in declared order; completion order is irrelevant
                    for rx in receivers {
                        let result = rx
                            .await
                            .map_err(|e| -> BoxError { Box::new(e) })??;
                        branch_results.push(drain_branch(result).await?);
                    }
                }
                None => {
                    trace!(source = %source, branches = actions.len(), "parallel fan-out (sequential)");
                    for action in &actions {
                        let result = action(state.clone(), config.clone()).await?;
                        branch_results.push(drain_branch(result).await?);
                    }
                }
            }

            // fan-in: fold every branch update into the input state in
            // declared order, then hand the merged state back as replace
            // writes so the outer merge does not re-apply append channels
            let mut merged = state;
            for updates in branch_results {
                for update in updates {
                    merged = update_state(merged, update, &channels)
                        .map_err(|e| -> BoxError { Box::new(e) })?;
                }
            }
            let update: PartialState = merged
                .into_iter()
                .map(|(key, value)| (key, ChannelWrite::Replace(value)))
                .collect();
            Ok(NodeResult::Update(update))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokioExecutor;
    use crate::graph::node_action;
    use graphflow_checkpoint::channels::AppenderChannel;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn appender_channels() -> Channels {
        let mut channels = Channels::new();
        channels.insert("hits".to_string(), Arc::new(AppenderChannel::new()));
        channels
    }

    fn branch(label: &str, delay_ms: u64) -> NodeActionFn {
        let label = label.to_string();
        node_action(move |_state| {
            let label = label.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(json!({"hits": label}))
            }
        })
    }

    async fn run(action: NodeActionFn, config: RunnableConfig) -> StateData {
        let result = action(StateData::new(), config).await.unwrap();
        let update = match result {
            NodeResult::Update(update) => update,
            _ => panic!("expected immediate update"),
        };
        update_state(StateData::new(), update, &HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_fan_in_declared_order() {
        let action = parallel_action(
            "fan".to_string(),
            vec![branch("b1", 0), branch("b2", 0), branch("b3", 0)],
            appender_channels(),
        );
        let state = run(action, RunnableConfig::new()).await;
        assert_eq!(state["hits"], json!(["b1", "b2", "b3"]));
    }

    #[tokio::test]
    async fn test_executor_fan_in_still_declared_order() {
        // the first branch finishes last; order must not change
        let action = parallel_action(
            "fan".to_string(),
            vec![branch("b1", 50), branch("b2", 10), branch("b3", 0)],
            appender_channels(),
        );
        let config = RunnableConfig::new().with_executor("fan", Arc::new(TokioExecutor));
        let state = run(action, config).await;
        assert_eq!(state["hits"], json!(["b1", "b2", "b3"]));
    }

    #[tokio::test]
    async fn test_replace_ties_go_to_later_branch() {
        let mut channels = Channels::new();
        channels.insert(
            "winner".to_string(),
            Arc::new(graphflow_checkpoint::LastValueChannel::new()),
        );
        let first = node_action(|_state| async { Ok(json!({"winner": "first"})) });
        let second = node_action(|_state| async { Ok(json!({"winner": "second"})) });
        let action = parallel_action("fan".to_string(), vec![first, second], channels);
        let state = run(action, RunnableConfig::new()).await;
        assert_eq!(state["winner"], json!("second"));
    }

    #[tokio::test]
    async fn test_branch_error_propagates() {
        let failing: NodeActionFn = node_action(|_state| async {
            Err::<serde_json::Value, _>("branch exploded".into())
        });
        let action = parallel_action(
            "fan".to_string(),
            vec![branch("ok", 0), failing],
            appender_channels(),
        );
        let err = action(StateData::new(), RunnableConfig::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("branch exploded"));
    }
}
