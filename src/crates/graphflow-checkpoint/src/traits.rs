//! Checkpoint saver contract
//!
//! A saver persists the checkpoint history of each execution thread. The
//! engine calls [`CheckpointSaver::put`] after every step and
//! [`CheckpointSaver::get`] when starting or resuming a thread.

use crate::checkpoint::{Checkpoint, CheckpointConfig, ReleaseTag};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence contract for checkpoint histories
///
/// Implementations must be safe to share across tasks; the engine holds a
/// saver behind an `Arc` and may checkpoint concurrent subgraph threads.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint
    ///
    /// When the config carries a `checkpoint_id` the matching checkpoint is
    /// returned; otherwise the most recent one for the thread. `None` when
    /// the thread has no history (or no checkpoint matches the id).
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    /// All checkpoints for the thread, most recent first
    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>>;

    /// Persist a checkpoint
    ///
    /// When the config's `checkpoint_id` matches an existing checkpoint the
    /// stored entry is replaced in place; otherwise the checkpoint is
    /// appended as the thread's newest entry. Returns a config addressing
    /// the written checkpoint.
    async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint)
        -> Result<CheckpointConfig>;

    /// Drop the thread's history, handing it back as a [`ReleaseTag`]
    async fn release(&self, config: &CheckpointConfig) -> Result<ReleaseTag>;
}
