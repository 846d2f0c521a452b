//! # graphflow-checkpoint
//!
//! State merge model and checkpoint persistence for graphflow.
//!
//! This crate defines:
//!
//! - [`channels`]: per-key merge policies ([`Channel`]) and the state merge
//!   algebra, including the reset/remove/replace write sentinels
//! - [`checkpoint`]: the immutable [`Checkpoint`] record and the
//!   [`CheckpointConfig`] addressing scheme
//! - [`traits`]: the async [`CheckpointSaver`] persistence contract
//! - [`memory`] / [`filesystem`]: the reference savers
//! - [`serializer`]: pluggable payload serialization
//!
//! The execution engine lives in `graphflow-core`; this crate has no
//! knowledge of graphs, only of state and its history.

pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use channels::{
    initial_state_from_channels, update_state, writes_from, AppenderChannel, Channel,
    ChannelWrite, Channels, LastValueChannel, PartialState, StateData,
};
pub use checkpoint::{Checkpoint, CheckpointConfig, ReleaseTag, THREAD_ID_DEFAULT};
pub use error::{CheckpointError, Result};
pub use filesystem::FileSystemSaver;
pub use memory::MemorySaver;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointSaver;
