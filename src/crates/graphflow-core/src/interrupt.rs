//! Interruption metadata
//!
//! When an interrupt-before or interrupt-after fires, the stream terminates
//! with an [`InterruptionMetadata`] describing where execution paused and
//! the state at that point. Resuming the same thread continues from the
//! checkpoint written before the pause.

use graphflow_checkpoint::channels::StateData;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Where and with what state execution paused
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptionMetadata {
    /// Node the cursor was on when the interrupt fired
    pub node_id: Option<String>,
    /// State at the time of the interrupt
    pub state: StateData,
    /// Free-form entries attached by the interrupting site
    pub metadata: HashMap<String, Value>,
}

impl InterruptionMetadata {
    pub fn new(node_id: Option<String>, state: StateData) -> Self {
        Self {
            node_id,
            state,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Look up a metadata entry
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}
