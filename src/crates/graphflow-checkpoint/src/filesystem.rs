//! Filesystem checkpoint saver
//!
//! Write-through [`CheckpointSaver`]: every thread's history lives in memory
//! and is mirrored to `thread-<id>.saver` under a target directory. On
//! [`release`](CheckpointSaver::release) the live file is archived as the
//! next free `thread-<id>-vN.saver` version and removed, so a finished run's
//! history stays inspectable on disk.

use crate::checkpoint::{Checkpoint, CheckpointConfig, ReleaseTag};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{trace, warn};

const EXTENSION: &str = ".saver";

type ThreadMap = HashMap<String, VecDeque<Checkpoint>>;

/// Checkpoint saver persisting each thread to a file
#[derive(Debug, Clone)]
pub struct FileSystemSaver<S = JsonSerializer> {
    target_dir: PathBuf,
    serializer: S,
    threads: Arc<RwLock<ThreadMap>>,
}

impl FileSystemSaver<JsonSerializer> {
    /// Saver writing JSON files under `target_dir`
    pub fn new(target_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(target_dir, JsonSerializer::new())
    }
}

impl<S: SerializerProtocol> FileSystemSaver<S> {
    /// Saver using an explicit serializer instance
    pub fn with_serializer(target_dir: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let target_dir = target_dir.into();
        if target_dir.is_file() {
            return Err(CheckpointError::Storage(format!(
                "target dir '{}' is a file",
                target_dir.display()
            )));
        }
        std::fs::create_dir_all(&target_dir)?;
        Ok(Self {
            target_dir,
            serializer,
            threads: Arc::new(RwLock::new(ThreadMap::new())),
        })
    }

    fn base_name(thread_id: &str) -> String {
        format!("thread-{thread_id}")
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.target_dir
            .join(format!("{}{EXTENSION}", Self::base_name(thread_id)))
    }

    async fn persist(&self, thread_id: &str, checkpoints: &VecDeque<Checkpoint>) -> Result<()> {
        let history: Vec<&Checkpoint> = checkpoints.iter().collect();
        let bytes = self.serializer.dumps(&history)?;
        tokio::fs::write(self.thread_path(thread_id), bytes).await?;
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<VecDeque<Checkpoint>> {
        let bytes = tokio::fs::read(path).await?;
        let history: Vec<Checkpoint> = self.serializer.loads(&bytes)?;
        Ok(history.into())
    }

    /// Ensure the thread's history is cached, loading its file on first use
    async fn hydrate(&self, thread_id: &str) -> Result<()> {
        {
            let threads = self.threads.read().await;
            if threads.contains_key(thread_id) {
                return Ok(());
            }
        }
        let path = self.thread_path(thread_id);
        let history = if path.exists() {
            self.load(&path).await?
        } else {
            VecDeque::new()
        };
        self.threads
            .write()
            .await
            .entry(thread_id.to_string())
            .or_insert(history);
        Ok(())
    }

    /// Next free version number for archived history files
    async fn next_version(&self, thread_id: &str) -> Result<u32> {
        let prefix = format!("{}-v", Self::base_name(thread_id));
        let mut max_version = 0u32;
        let mut entries = tokio::fs::read_dir(&self.target_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(version) = rest.strip_suffix(EXTENSION) {
                    if let Ok(version) = version.parse::<u32>() {
                        max_version = max_version.max(version);
                    }
                }
            }
        }
        Ok(max_version + 1)
    }

    /// Delete the live history file for the config's thread
    pub async fn delete_file(&self, config: &CheckpointConfig) -> Result<bool> {
        let path = self.thread_path(config.thread_id_or_default());
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointSaver for FileSystemSaver<S> {
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let thread_id = config.thread_id_or_default();
        self.hydrate(thread_id).await?;
        let threads = self.threads.read().await;
        let checkpoints = match threads.get(thread_id) {
            Some(checkpoints) => checkpoints,
            None => return Ok(None),
        };
        match &config.checkpoint_id {
            Some(id) => Ok(checkpoints.iter().find(|cp| &cp.id == id).cloned()),
            None => Ok(checkpoints.front().cloned()),
        }
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>> {
        let thread_id = config.thread_id_or_default();
        self.hydrate(thread_id).await?;
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|checkpoints| checkpoints.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.thread_id_or_default().to_string();
        self.hydrate(&thread_id).await?;

        let mut threads = self.threads.write().await;
        let checkpoints = threads.entry(thread_id.clone()).or_default();

        if let Some(id) = &config.checkpoint_id {
            let slot = checkpoints
                .iter_mut()
                .find(|cp| &cp.id == id)
                .ok_or_else(|| CheckpointError::NotFound(id.clone()))?;
            *slot = checkpoint.clone();
        } else {
            checkpoints.push_front(checkpoint.clone());
        }
        self.persist(&thread_id, checkpoints).await?;
        trace!(thread_id = %thread_id, checkpoint_id = %checkpoint.id, "checkpoint written");

        Ok(CheckpointConfig::new()
            .with_thread_id(thread_id)
            .with_checkpoint_id(checkpoint.id))
    }

    async fn release(&self, config: &CheckpointConfig) -> Result<ReleaseTag> {
        let thread_id = config.thread_id_or_default().to_string();
        self.hydrate(&thread_id).await?;

        let mut threads = self.threads.write().await;
        let checkpoints = threads.remove(&thread_id).unwrap_or_default();

        let live_path = self.thread_path(&thread_id);
        if live_path.exists() {
            let version = self.next_version(&thread_id).await?;
            let backup = self.target_dir.join(format!(
                "{}-v{version}{EXTENSION}",
                Self::base_name(&thread_id)
            ));
            tokio::fs::copy(&live_path, &backup).await?;
            tokio::fs::remove_file(&live_path).await?;
            trace!(thread_id = %thread_id, backup = %backup.display(), "history archived");
        } else {
            warn!(path = %live_path.display(), "history file missing, skipping archive");
        }

        Ok(ReleaseTag {
            thread_id,
            checkpoints: checkpoints.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::StateData;
    use serde_json::json;

    fn checkpoint(node: &str) -> Checkpoint {
        let mut state = StateData::new();
        state.insert("node".to_string(), json!(node));
        Checkpoint::new(state).with_node_id(node)
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig::new().with_thread_id("t1");

        {
            let saver = FileSystemSaver::new(dir.path()).unwrap();
            saver.put(&config, checkpoint("a")).await.unwrap();
            saver.put(&config, checkpoint("b")).await.unwrap();
        }

        let reopened = FileSystemSaver::new(dir.path()).unwrap();
        let nodes: Vec<_> = reopened
            .list(&config)
            .await
            .unwrap()
            .into_iter()
            .map(|cp| cp.node_id.unwrap())
            .collect();
        assert_eq!(nodes, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_release_archives_versioned_file() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSystemSaver::new(dir.path()).unwrap();
        let config = CheckpointConfig::new().with_thread_id("t1");

        saver.put(&config, checkpoint("a")).await.unwrap();
        saver.release(&config).await.unwrap();

        assert!(!dir.path().join("thread-t1.saver").exists());
        assert!(dir.path().join("thread-t1-v1.saver").exists());

        // a second run of the same thread archives as v2
        saver.put(&config, checkpoint("b")).await.unwrap();
        saver.release(&config).await.unwrap();
        assert!(dir.path().join("thread-t1-v2.saver").exists());
    }

    #[tokio::test]
    async fn test_get_by_id_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig::new().with_thread_id("t1");
        let target = checkpoint("a");
        let target_id = target.id.clone();

        {
            let saver = FileSystemSaver::new(dir.path()).unwrap();
            saver.put(&config, target).await.unwrap();
            saver.put(&config, checkpoint("b")).await.unwrap();
        }

        let reopened = FileSystemSaver::new(dir.path()).unwrap();
        let found = reopened
            .get(&config.clone().with_checkpoint_id(target_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.node_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSystemSaver::new(dir.path()).unwrap();
        let config = CheckpointConfig::new().with_thread_id("t1");

        assert!(!saver.delete_file(&config).await.unwrap());
        saver.put(&config, checkpoint("a")).await.unwrap();
        assert!(saver.delete_file(&config).await.unwrap());
    }

    #[test]
    fn test_rejects_file_as_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        assert!(FileSystemSaver::new(&file).is_err());
    }
}
