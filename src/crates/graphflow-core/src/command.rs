//! Commands returned by conditional edge actions
//!
//! A [`Command`] names the branch label to follow and may carry a state
//! update that is merged before the next node runs.

use graphflow_checkpoint::channels::{writes_from, PartialState};
use serde_json::Value;

/// Routing decision produced by a conditional edge action
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// Branch label, resolved through the edge's mappings
    pub goto: Option<String>,
    /// State update applied before the next node runs
    pub update: PartialState,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command that only routes
    pub fn goto(label: impl Into<String>) -> Self {
        Self::new().with_goto(label)
    }

    /// Set the branch label
    pub fn with_goto(mut self, label: impl Into<String>) -> Self {
        self.goto = Some(label.into());
        self
    }

    /// Set the state update from a JSON object
    pub fn with_update(mut self, update: Value) -> Self {
        self.update = writes_from(update);
        self
    }

    /// Set the state update from explicit channel writes
    pub fn with_writes(mut self, update: PartialState) -> Self {
        self.update = update;
        self
    }
}
