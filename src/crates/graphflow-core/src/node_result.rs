//! Node action results
//!
//! A node action either produces its partial state update immediately, or
//! defers to an embedded step stream (a nested compiled graph) whose steps
//! surface through the parent stream before the node's own output.

use crate::error::GraphError;
use crate::stream::GraphStep;
use futures::stream::Stream;
use graphflow_checkpoint::channels::{writes_from, PartialState};
use serde_json::Value;
use std::pin::Pin;

/// One item of an embedded step stream
pub enum EmbedItem {
    /// A step produced by the embedded graph
    Step(GraphStep),
    /// Terminal item: the effective update of the delegating node
    Done(PartialState),
}

/// Stream of embedded steps ending in [`EmbedItem::Done`]
pub type EmbedStream = Pin<Box<dyn Stream<Item = Result<EmbedItem, GraphError>> + Send>>;

/// Result of a node action
pub enum NodeResult {
    /// Merge this partial update and continue
    Update(PartialState),
    /// Drain the embedded stream first; its steps are emitted as sub-graph
    /// steps, then `update` and the stream's terminal update are merged
    Deferred {
        stream: EmbedStream,
        update: PartialState,
    },
}

impl NodeResult {
    /// Empty update
    pub fn empty() -> Self {
        NodeResult::Update(PartialState::new())
    }

    /// Deferred result with no immediate update
    pub fn deferred(stream: EmbedStream) -> Self {
        NodeResult::Deferred {
            stream,
            update: PartialState::new(),
        }
    }
}

impl From<PartialState> for NodeResult {
    fn from(update: PartialState) -> Self {
        NodeResult::Update(update)
    }
}

impl From<Value> for NodeResult {
    fn from(value: Value) -> Self {
        NodeResult::Update(writes_from(value))
    }
}

impl std::fmt::Debug for NodeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeResult::Update(update) => f.debug_tuple("Update").field(update).finish(),
            NodeResult::Deferred { update, .. } => f
                .debug_struct("Deferred")
                .field("update", update)
                .field("stream", &"<stream>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphflow_checkpoint::channels::ChannelWrite;
    use serde_json::json;

    #[test]
    fn test_from_json_object() {
        let result = NodeResult::from(json!({"k": 1}));
        match result {
            NodeResult::Update(update) => {
                assert_eq!(update["k"], ChannelWrite::Value(json!(1)));
            }
            _ => panic!("expected immediate update"),
        }
    }

    #[test]
    fn test_empty() {
        match NodeResult::empty() {
            NodeResult::Update(update) => assert!(update.is_empty()),
            _ => panic!("expected immediate update"),
        }
    }
}
