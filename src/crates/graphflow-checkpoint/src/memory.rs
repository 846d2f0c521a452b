//! In-memory checkpoint saver
//!
//! Reference [`CheckpointSaver`] implementation backed by a
//! `tokio::sync::RwLock` over a per-thread deque, newest checkpoint at the
//! front. History does not survive the process; use
//! [`FileSystemSaver`](crate::filesystem::FileSystemSaver) when it must.

use crate::checkpoint::{Checkpoint, CheckpointConfig, ReleaseTag};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

type ThreadMap = HashMap<String, VecDeque<Checkpoint>>;

/// In-memory checkpoint storage
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    threads: Arc<RwLock<ThreadMap>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads currently holding history
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Number of checkpoints stored for the config's thread
    pub async fn checkpoint_count(&self, config: &CheckpointConfig) -> usize {
        self.threads
            .read()
            .await
            .get(config.thread_id_or_default())
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drop all stored history
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for MemorySaver {
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        let checkpoints = match threads.get(config.thread_id_or_default()) {
            Some(checkpoints) => checkpoints,
            None => return Ok(None),
        };
        match &config.checkpoint_id {
            Some(id) => Ok(checkpoints.iter().find(|cp| &cp.id == id).cloned()),
            None => Ok(checkpoints.front().cloned()),
        }
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(config.thread_id_or_default())
            .map(|checkpoints| checkpoints.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.thread_id_or_default().to_string();
        let mut threads = self.threads.write().await;
        let checkpoints = threads.entry(thread_id.clone()).or_default();

        if let Some(id) = &config.checkpoint_id {
            let slot = checkpoints
                .iter_mut()
                .find(|cp| &cp.id == id)
                .ok_or_else(|| CheckpointError::NotFound(id.clone()))?;
            trace!(thread_id = %thread_id, checkpoint_id = %id, "checkpoint updated");
            *slot = checkpoint.clone();
        } else {
            trace!(thread_id = %thread_id, checkpoint_id = %checkpoint.id, "checkpoint inserted");
            checkpoints.push_front(checkpoint.clone());
        }

        Ok(CheckpointConfig::new()
            .with_thread_id(thread_id)
            .with_checkpoint_id(checkpoint.id))
    }

    async fn release(&self, config: &CheckpointConfig) -> Result<ReleaseTag> {
        let thread_id = config.thread_id_or_default().to_string();
        let mut threads = self.threads.write().await;
        let checkpoints = threads.remove(&thread_id).unwrap_or_default();
        trace!(thread_id = %thread_id, count = checkpoints.len(), "thread released");
        Ok(ReleaseTag {
            thread_id,
            checkpoints: checkpoints.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(node: &str) -> Checkpoint {
        let mut state = crate::channels::StateData::new();
        state.insert("node".to_string(), json!(node));
        Checkpoint::new(state).with_node_id(node)
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new().with_thread_id("t1");

        saver.put(&config, checkpoint("a")).await.unwrap();
        saver.put(&config, checkpoint("b")).await.unwrap();

        let latest = saver.get(&config).await.unwrap().unwrap();
        assert_eq!(latest.node_id.as_deref(), Some("b"));
        assert_eq!(saver.checkpoint_count(&config).await, 2);
    }

    #[tokio::test]
    async fn test_get_by_checkpoint_id() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new().with_thread_id("t1");

        let first = checkpoint("a");
        let first_id = first.id.clone();
        saver.put(&config, first).await.unwrap();
        saver.put(&config, checkpoint("b")).await.unwrap();

        let addressed = config.clone().with_checkpoint_id(first_id);
        let found = saver.get(&addressed).await.unwrap().unwrap();
        assert_eq!(found.node_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_put_with_id_replaces_in_place() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new().with_thread_id("t1");

        let original = checkpoint("a");
        let written = saver.put(&config, original).await.unwrap();

        let replacement = checkpoint("a-forked");
        saver.put(&written, replacement.clone()).await.unwrap();

        assert_eq!(saver.checkpoint_count(&config).await, 1);
        let stored = saver.get(&config).await.unwrap().unwrap();
        assert_eq!(stored.node_id.as_deref(), Some("a-forked"));
        assert_eq!(stored.id, replacement.id);
    }

    #[tokio::test]
    async fn test_put_with_unknown_id_fails() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new()
            .with_thread_id("t1")
            .with_checkpoint_id("no-such-id");
        let err = saver.put(&config, checkpoint("a")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new().with_thread_id("t1");
        saver.put(&config, checkpoint("a")).await.unwrap();
        saver.put(&config, checkpoint("b")).await.unwrap();
        saver.put(&config, checkpoint("c")).await.unwrap();

        let nodes: Vec<_> = saver
            .list(&config)
            .await
            .unwrap()
            .into_iter()
            .map(|cp| cp.node_id.unwrap())
            .collect();
        assert_eq!(nodes, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let saver = MemorySaver::new();
        let t1 = CheckpointConfig::new().with_thread_id("t1");
        let t2 = CheckpointConfig::new().with_thread_id("t2");
        saver.put(&t1, checkpoint("a")).await.unwrap();

        assert!(saver.get(&t2).await.unwrap().is_none());
        assert_eq!(saver.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_returns_history() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new().with_thread_id("t1");
        saver.put(&config, checkpoint("a")).await.unwrap();
        saver.put(&config, checkpoint("b")).await.unwrap();

        let tag = saver.release(&config).await.unwrap();
        assert_eq!(tag.thread_id, "t1");
        assert_eq!(tag.checkpoints.len(), 2);
        assert!(saver.get(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_thread_id() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new();
        saver.put(&config, checkpoint("a")).await.unwrap();
        let tag = saver.release(&config).await.unwrap();
        assert_eq!(tag.thread_id, crate::checkpoint::THREAD_ID_DEFAULT);
    }
}
