use thiserror::Error;

use super::NodeError;

/// Engine-level errors: definition problems and failed node executions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow has no nodes")]
    EmptyDefinition,
    #[error("no start node found")]
    NoEntryNode,
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("node {node_id} ({node_type}) failed: {source}")]
    NodeFailed {
        node_id: String,
        node_type: String,
        #[source]
        source: NodeError,
    },
    #[error("continue node {node_id} waits for {after}, which is not reachable")]
    ContinueUnreachable { node_id: String, after: String },
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Wrap a node failure with the offending node's identity.
    pub fn node_failed(node_id: &str, node_type: &str, source: NodeError) -> Self {
        EngineError::NodeFailed {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            source,
        }
    }
}
