//! Channels: per-key merge policies for graph state
//!
//! Graph state is a flat map from string keys to JSON values. When a node
//! returns a partial update, each key is merged into the current state
//! through the *channel* registered for that key. Keys without a channel use
//! replace semantics (last write wins).
//!
//! Two channel policies are built in:
//!
//! - [`LastValueChannel`]: the new value replaces the old one
//! - [`AppenderChannel`]: values accumulate into a JSON array
//!
//! A write is expressed as a [`ChannelWrite`], which besides a plain value
//! can carry one of the merge sentinels:
//!
//! - [`ChannelWrite::Reset`]: drop the key back to its channel default
//!   (writing JSON `null` is equivalent)
//! - [`ChannelWrite::Remove`]: delete the key outright
//! - [`ChannelWrite::Replace`]: bypass the channel and overwrite; for an
//!   appender channel this replaces the whole collection instead of
//!   appending
//!
//! Sentinels are honored during the merge itself, before any channel is
//! consulted, so they behave the same for every channel type.
//!
//! # Example
//!
//! ```rust
//! use graphflow_checkpoint::channels::{update_state, writes_from, AppenderChannel, Channels};
//! use serde_json::json;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let mut channels: Channels = HashMap::new();
//! channels.insert("messages".to_string(), Arc::new(AppenderChannel::new()));
//!
//! let state = HashMap::new();
//! let state = update_state(state, writes_from(json!({"messages": "A"})), &channels).unwrap();
//! let state = update_state(state, writes_from(json!({"messages": "B"})), &channels).unwrap();
//!
//! assert_eq!(state["messages"], json!(["A", "B"]));
//! ```

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Graph state: a flat map of JSON values
pub type StateData = HashMap<String, Value>;

/// Registered channels, keyed by the state key they govern
pub type Channels = HashMap<String, Arc<dyn Channel>>;

/// A single write into a partial state update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum ChannelWrite {
    /// Merge the value through the key's channel
    Value(Value),
    /// Overwrite the stored value, bypassing the channel
    Replace(Value),
    /// Drop the key back to the channel default (or remove it when none)
    Reset,
    /// Delete the key
    Remove,
}

impl From<Value> for ChannelWrite {
    fn from(value: Value) -> Self {
        // JSON null has always meant "reset this key"
        if value.is_null() {
            ChannelWrite::Reset
        } else {
            ChannelWrite::Value(value)
        }
    }
}

/// A partial state update, as returned by node actions
pub type PartialState = HashMap<String, ChannelWrite>;

/// Convert a JSON object into a [`PartialState`]
///
/// Object fields become [`ChannelWrite::Value`] writes; `null` fields become
/// [`ChannelWrite::Reset`]. A non-object value yields an empty update.
pub fn writes_from(value: Value) -> PartialState {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, ChannelWrite::from(v)))
            .collect(),
        _ => PartialState::new(),
    }
}

/// Merge policy for a single state key
///
/// A channel decides how a new value combines with the previously stored one
/// and optionally supplies a default used to seed fresh state.
pub trait Channel: Send + Sync {
    /// Default value for the key, if the channel defines one
    fn default_value(&self) -> Option<Value> {
        None
    }

    /// Combine the previously stored value with a new one
    fn update(&self, key: &str, old: Option<&Value>, new: Value) -> Result<Value>;
}

/// Replace semantics: the new value wins
///
/// This is also the implicit policy for keys with no registered channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastValueChannel;

impl LastValueChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Channel for LastValueChannel {
    fn update(&self, _key: &str, _old: Option<&Value>, new: Value) -> Result<Value> {
        Ok(new)
    }
}

/// Accumulating semantics: values append to a JSON array
///
/// The backing collection is created on demand from the empty-collection
/// factory (a JSON array by default). An array update extends the
/// collection element by element; any other update pushes a single element.
#[derive(Clone)]
pub struct AppenderChannel {
    factory: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl std::fmt::Debug for AppenderChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppenderChannel").finish_non_exhaustive()
    }
}

impl AppenderChannel {
    /// Appender backed by an empty JSON array
    pub fn new() -> Self {
        Self {
            factory: Arc::new(|| Value::Array(Vec::new())),
        }
    }

    /// Appender backed by a custom empty-collection factory
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

impl Default for AppenderChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for AppenderChannel {
    fn default_value(&self) -> Option<Value> {
        Some((self.factory)())
    }

    fn update(&self, key: &str, old: Option<&Value>, new: Value) -> Result<Value> {
        let base = match old {
            Some(v) => v.clone(),
            None => (self.factory)(),
        };
        let mut items = match base {
            Value::Array(items) => items,
            other => {
                return Err(CheckpointError::Channel {
                    key: key.to_string(),
                    error: format!("appender expects an array, found {other}"),
                })
            }
        };
        match new {
            Value::Array(mut tail) => items.append(&mut tail),
            value => items.push(value),
        }
        Ok(Value::Array(items))
    }
}

/// Seed a fresh state with every channel default
pub fn initial_state_from_channels(channels: &Channels) -> StateData {
    channels
        .iter()
        .filter_map(|(key, channel)| channel.default_value().map(|v| (key.clone(), v)))
        .collect()
}

/// Apply a partial update to a state map and return the merged state
///
/// Sentinel writes are resolved first; plain values go through the key's
/// channel, or replace the stored value when no channel is registered.
pub fn update_state(
    mut state: StateData,
    partial: PartialState,
    channels: &Channels,
) -> Result<StateData> {
    for (key, write) in partial {
        match write {
            ChannelWrite::Remove => {
                state.remove(&key);
            }
            ChannelWrite::Reset => {
                match channels.get(&key).and_then(|c| c.default_value()) {
                    Some(default) => {
                        state.insert(key, default);
                    }
                    None => {
                        state.remove(&key);
                    }
                };
            }
            ChannelWrite::Replace(value) => {
                state.insert(key, value);
            }
            ChannelWrite::Value(value) => {
                let merged = match channels.get(&key) {
                    Some(channel) => channel.update(&key, state.get(&key), value)?,
                    None => value,
                };
                state.insert(key, merged);
            }
        }
    }
    Ok(state)
}
