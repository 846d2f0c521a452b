//! Checkpoint data model
//!
//! A [`Checkpoint`] is an immutable record of graph state taken after one
//! execution step: the merged state, the node that produced it and the node
//! scheduled next. Checkpoints are addressed by a [`CheckpointConfig`]
//! carrying a thread id and, optionally, a checkpoint id.

use crate::channels::{update_state, Channels, PartialState, StateData};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Thread id used when a config does not specify one
pub const THREAD_ID_DEFAULT: &str = "$default";

/// Immutable snapshot of graph state after a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Unique checkpoint id
    pub id: String,
    /// Merged state at the time of the step
    pub state: StateData,
    /// Node that produced this state
    pub node_id: Option<String>,
    /// Node scheduled to run next
    pub next_node_id: Option<String>,
    /// Creation timestamp
    pub ts: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh id for the given state
    pub fn new(state: StateData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state,
            node_id: None,
            next_node_id: None,
            ts: Utc::now(),
        }
    }

    /// Set the node that produced this checkpoint
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Set the node scheduled next
    pub fn with_next_node_id(mut self, next_node_id: impl Into<String>) -> Self {
        self.next_node_id = Some(next_node_id.into());
        self
    }

    /// Same content under a fresh identity
    ///
    /// Used when forking history: the copy is a new checkpoint and will not
    /// overwrite the original on `put`.
    pub fn copy_with_new_id(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            ..self.clone()
        }
    }

    /// Same identity with the partial update merged into the state
    pub fn update_state(self, partial: PartialState, channels: &Channels) -> Result<Self> {
        let state = update_state(self.state, partial, channels)?;
        Ok(Self { state, ..self })
    }
}

/// Addresses checkpoints within a saver
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Conversation/run thread; `None` means [`THREAD_ID_DEFAULT`]
    pub thread_id: Option<String>,
    /// Specific checkpoint within the thread; `None` means the latest
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Thread id, falling back to [`THREAD_ID_DEFAULT`]
    pub fn thread_id_or_default(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(THREAD_ID_DEFAULT)
    }
}

/// History handed back when a thread is released
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTag {
    /// Thread whose history was released
    pub thread_id: String,
    /// The released checkpoints, most recent first
    pub checkpoints: Vec<Checkpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{writes_from, AppenderChannel};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state_with(key: &str, value: serde_json::Value) -> StateData {
        let mut state = StateData::new();
        state.insert(key.to_string(), value);
        state
    }

    #[test]
    fn test_checkpoint_new_has_unique_id() {
        let a = Checkpoint::new(StateData::new());
        let b = Checkpoint::new(StateData::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_copy_with_new_id_preserves_content() {
        let cp = Checkpoint::new(state_with("k", json!(1)))
            .with_node_id("a")
            .with_next_node_id("b");
        let copy = cp.copy_with_new_id();
        assert_ne!(cp.id, copy.id);
        assert_eq!(cp.state, copy.state);
        assert_eq!(copy.node_id.as_deref(), Some("a"));
        assert_eq!(copy.next_node_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_update_state_keeps_identity() {
        let mut channels: Channels = HashMap::new();
        channels.insert("messages".to_string(), Arc::new(AppenderChannel::new()));

        let cp = Checkpoint::new(state_with("messages", json!(["A"])));
        let id = cp.id.clone();
        let cp = cp
            .update_state(writes_from(json!({"messages": "B"})), &channels)
            .unwrap();
        assert_eq!(cp.id, id);
        assert_eq!(cp.state["messages"], json!(["A", "B"]));
    }

    #[test]
    fn test_config_thread_id_default() {
        assert_eq!(CheckpointConfig::new().thread_id_or_default(), THREAD_ID_DEFAULT);
        let config = CheckpointConfig::new().with_thread_id("t1");
        assert_eq!(config.thread_id_or_default(), "t1");
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let cp = Checkpoint::new(state_with("k", json!({"nested": [1, 2]}))).with_node_id("n");
        let bytes = serde_json::to_vec(&cp).unwrap();
        let restored: Checkpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cp, restored);
    }
}
