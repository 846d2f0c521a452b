//! Run configuration
//!
//! A [`RunnableConfig`] travels with every run: it addresses the checkpoint
//! thread, selects the stream mode, carries caller metadata (visible to node
//! and edge actions) and optionally registers per-node task executors used
//! by parallel fan-out nodes.

use futures::future::BoxFuture;
use graphflow_checkpoint::CheckpointConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What each emitted step carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Node id and state only
    #[default]
    Values,
    /// Additionally a [`StateSnapshot`](crate::stream::StateSnapshot) tied
    /// to the step's checkpoint
    Snapshots,
}

/// Spawns branch futures for parallel fan-out nodes
///
/// Registered per fan-out source id on the [`RunnableConfig`]; branches of a
/// fan-out without a registered executor run sequentially.
pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}

/// [`TaskExecutor`] backed by `tokio::spawn`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioExecutor;

impl TaskExecutor for TokioExecutor {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        tokio::spawn(fut);
    }
}

/// Per-run configuration
#[derive(Clone, Default)]
pub struct RunnableConfig {
    /// Checkpoint thread id
    pub thread_id: Option<String>,
    /// Specific checkpoint to start from
    pub checkpoint_id: Option<String>,
    /// Next node hint, populated by state forking
    pub next_node: Option<String>,
    /// Stream mode for emitted steps
    pub stream_mode: StreamMode,
    /// Caller metadata, readable from actions
    pub metadata: HashMap<String, Value>,
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl std::fmt::Debug for RunnableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableConfig")
            .field("thread_id", &self.thread_id)
            .field("checkpoint_id", &self.checkpoint_id)
            .field("next_node", &self.next_node)
            .field("stream_mode", &self.stream_mode)
            .field("metadata", &self.metadata)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RunnableConfig {
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

    pub fn with_stream_mode(mut self, stream_mode: StreamMode) -> Self {
        self.stream_mode = stream_mode;
        self
    }

    pub fn with_next_node(mut self, next_node: impl Into<String>) -> Self {
        self.next_node = Some(next_node.into());
        self
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

    /// Register a task executor for the given fan-out source node
    pub fn with_executor(
        mut self,
        node_id: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        self.executors.insert(node_id.into(), executor);
        self
    }

    /// Executor registered for the given fan-out source node, if any
    pub fn executor(&self, node_id: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(node_id).cloned()
    }

    /// The checkpoint-addressing part of this config
    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            thread_id: self.thread_id.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_chain() {
        let config = RunnableConfig::new()
            .with_thread_id("t1")
            .with_stream_mode(StreamMode::Snapshots)
            .with_metadata("who", json!("tests"));
        assert_eq!(config.thread_id.as_deref(), Some("t1"));
        assert_eq!(config.stream_mode, StreamMode::Snapshots);
        assert_eq!(config.metadata("who"), Some(&json!("tests")));
    }

    #[test]
    fn test_checkpoint_config_projection() {
        let config = RunnableConfig::new()
            .with_thread_id("t1")
            .with_checkpoint_id("cp1");
        let cp = config.checkpoint_config();
        assert_eq!(cp.thread_id.as_deref(), Some("t1"));
        assert_eq!(cp.checkpoint_id.as_deref(), Some("cp1"));
    }

    #[test]
    fn test_executor_lookup() {
        let config = RunnableConfig::new().with_executor("fan_out", Arc::new(TokioExecutor));
        assert!(config.executor("fan_out").is_some());
        assert!(config.executor("other").is_none());
    }
}
