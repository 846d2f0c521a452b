//! Error types for graph construction, compilation and execution
//!
//! Errors fall into four groups, all carried by [`GraphError`]:
//!
//! - **definition/compile errors**: structural problems caught while
//!   building or compiling a graph (duplicate ids, missing entry point,
//!   invalid parallel or subgraph shapes)
//! - **runtime resolution errors**: a step needs a node, edge or mapping
//!   that the compiled tables do not contain
//! - **application errors**: a node or edge action failed; wrapped with the
//!   id of the failing node
//! - **guard-rail errors**: the max-iteration guard tripped, or a
//!   resume/state API was called without the saver or checkpoint it needs

use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Boxed error type returned by node and edge actions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building, compiling or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    // ---- definition / compile ----
    /// A node with the same id was already added
    #[error("node with id '{0}' already exists")]
    DuplicateNode(String),

    /// An edge with the same source was already added
    #[error("edge with source id '{0}' already exists")]
    DuplicateEdge(String),

    /// Reserved or empty node id
    #[error("'{0}' is not a valid node id")]
    InvalidNodeId(String),

    /// END cannot be an edge source
    #[error("'{0}' is not a valid edge source")]
    InvalidEdgeSource(String),

    /// START cannot be an edge target
    #[error("'{0}' is not a valid edge target")]
    InvalidEdgeTarget(String),

    /// No edge leaves START
    #[error("missing entry point: no edge from START")]
    MissingEntryPoint,

    /// An edge references a node that was never added
    #[error("edge from '{source_id}' references unknown node '{target}'")]
    UnknownEdgeTarget {
        /// Edge source id
        source_id: String,
        /// The missing target id
        target: String,
    },

    /// A conditional edge was declared without mappings
    #[error("conditional edge from '{0}' has no mappings")]
    EmptyEdgeMappings(String),

    /// A declared interrupt names a node that does not exist after compile
    #[error("interruption node '{0}' does not exist")]
    UnknownInterruptionNode(String),

    /// A fan-out branch routes through a conditional edge
    #[error("parallel node on '{source_id}' does not support conditional branches (found on {steps:?})")]
    ParallelConditionalBranch {
        /// Fan-out source id
        source_id: String,
        /// Branches carrying conditional edges
        steps: Vec<String>,
    },

    /// Fan-out branches do not converge on a single target
    #[error("parallel node on '{source_id}' must converge on a single target, found {targets:?}")]
    ParallelMultipleTargets {
        /// Fan-out source id
        source_id: String,
        /// The distinct targets found
        targets: Vec<String>,
    },

    /// A subgraph's entry edge fans out
    #[error("subgraph '{0}' cannot start with parallel branches")]
    SubgraphParallelEntry(String),

    /// A subgraph's entry edge is conditional
    #[error("the entry edge of subgraph '{0}' must be a direct edge")]
    SubgraphConditionalEntry(String),

    /// The subgraph node is never targeted by an edge
    #[error("the node '{0}' is not present as a target in the graph")]
    SubgraphNotATarget(String),

    /// The subgraph's outgoing edge fans out
    #[error("subgraph '{0}' cannot route to parallel branches")]
    SubgraphParallelExit(String),

    /// Interrupt-after on a subgraph whose successor cannot be named
    #[error("'interrupt after' on subgraph '{0}' is not supported")]
    InterruptAfterSubgraph(String),

    /// Interrupt-after on a subgraph with a nameable successor
    #[error("'interrupt after' on subgraph '{node}' is not supported; consider 'interrupt before' on node '{successor}'")]
    InterruptAfterSubgraphWithSuccessor {
        /// The subgraph node
        node: String,
        /// Its direct successor
        successor: String,
    },

    // ---- runtime resolution ----
    /// A step addressed a node absent from the compiled tables
    #[error("node with id '{0}' doesn't exist")]
    MissingNode(String),

    /// A step needed an outgoing edge that doesn't exist
    #[error("edge with source id '{0}' doesn't exist")]
    MissingEdge(String),

    /// A conditional edge returned a label with no mapping
    #[error("cannot find edge mapping for '{mapping}' in conditional edge with source id '{source_id}'")]
    MissingEdgeMapping {
        /// Edge source id
        source_id: String,
        /// The unmapped label
        mapping: String,
    },

    // ---- application ----
    /// A node action failed
    #[error("error executing node '{node}': {error}")]
    NodeExecution {
        /// Id of the failing node
        node: String,
        /// Error description
        error: String,
    },

    /// A conditional edge action failed
    #[error("error executing conditional edge from '{source_id}': {error}")]
    EdgeExecution {
        /// Edge source id
        source_id: String,
        /// Error description
        error: String,
    },

    // ---- guard rails ----
    /// The step guard tripped
    #[error("maximum number of iterations ({0}) reached")]
    MaxIterationsReached(usize),

    /// The operation requires a checkpoint saver
    #[error("missing checkpoint saver")]
    MissingSaver,

    /// The operation requires a saved checkpoint
    #[error("missing checkpoint")]
    MissingCheckpoint,

    // ---- wrapped ----
    /// Checkpoint persistence error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] graphflow_checkpoint::CheckpointError),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom application-defined error
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Wrap a node action failure with the node id
    pub fn node_execution(node: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.to_string(),
        }
    }

    /// Wrap a conditional edge action failure with its source id
    pub fn edge_execution(source_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::EdgeExecution {
            source_id: source_id.into(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    // the id fields are plain strings, not wrapped causes
    #[test]
    fn test_id_carrying_variants_have_no_cause() {
        let err = GraphError::UnknownEdgeTarget {
            source_id: "a".to_string(),
            target: "ghost".to_string(),
        };
        assert!(err.source().is_none());
        assert_eq!(
            err.to_string(),
            "edge from 'a' references unknown node 'ghost'"
        );

        let err = GraphError::edge_execution("router", "boom");
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "error executing conditional edge from 'router': boom");
    }
}
