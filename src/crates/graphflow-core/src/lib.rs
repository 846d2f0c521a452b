//! Graph-based workflow execution
//!
//! Workflows are declared as a [`StateGraph`](graph::StateGraph): async node
//! actions over a shared JSON state, connected by direct or conditional
//! edges. Compiling produces a [`CompiledGraph`](compiled::CompiledGraph)
//! that runs as a pull-based stream of steps, with per-key merge channels,
//! checkpointing through `graphflow-checkpoint`, parallel fan-out, nested
//! subgraphs and human-in-the-loop interrupts.
//!
//! ```rust,no_run
//! use graphflow_core::compile::CompileConfig;
//! use graphflow_core::config::RunnableConfig;
//! use graphflow_core::graph::{node_action, StateGraph, END, START};
//! use graphflow_checkpoint::AppenderChannel;
//! use serde_json::json;
//!
//! # async fn run() -> graphflow_core::error::Result<()> {
//! let graph = StateGraph::new()
//!     .add_channel("messages", AppenderChannel::new())
//!     .add_node("greet", node_action(|_state| async { Ok(json!({"messages": "hello"})) }))?
//!     .add_edge(START, "greet")?
//!     .add_edge("greet", END)?
//!     .compile(CompileConfig::new())?;
//!
//! let state = graph.invoke(json!({}), RunnableConfig::new()).await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod compile;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod node_result;
pub mod parallel;
pub mod stream;
pub mod subgraph;

pub use command::Command;
pub use compile::CompileConfig;
pub use compiled::CompiledGraph;
pub use config::{RunnableConfig, StreamMode, TaskExecutor, TokioExecutor};
pub use error::{BoxError, GraphError, Result};
pub use graph::{
    command_action, node_action, node_action_with_config, router, EdgeActionFn, InterruptHookFn,
    NodeActionFn, NodeId, StateGraph, END, START,
};
pub use interrupt::InterruptionMetadata;
pub use node_result::{EmbedItem, EmbedStream, NodeResult};
pub use parallel::parallel_node_id;
pub use stream::{GraphInput, GraphStep, GraphStream, StateSnapshot, StepOutput};
pub use subgraph::resume_subgraph_key;
