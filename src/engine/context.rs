//! Per-run context threaded into every node execution.
//!
//! The HTTP response coupling and the config store ride on explicit optional
//! fields rather than untyped context values, so a node states what it needs
//! in its signature and the rest of the engine stays oblivious.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::NodeError;
use crate::model::NodeConfig;
use crate::store::{ConfigStore, NodeConfigStore, WorkflowStore};

/// Response captured by an `http_out` node for the request that triggered
/// the run.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Run-scoped handle coupling a workflow run to the HTTP request that
/// triggered it. Exactly one `http_out` write wins; the engine terminates
/// the traversal once the sent flag is up.
#[derive(Default)]
pub struct HttpCoupling {
    sent: AtomicBool,
    response: Mutex<Option<StoredResponse>>,
}

impl HttpCoupling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    /// Store the response; returns false when a response was already written.
    pub fn write(&self, response: StoredResponse) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.response.lock() = Some(response);
        true
    }

    /// Hand the stored response to the dispatcher, once the run is over.
    pub fn take_response(&self) -> Option<StoredResponse> {
        self.response.lock().take()
    }
}

/// Handles the engine injects so the `flow` node can resolve and run
/// sub-workflows recursively.
#[derive(Clone)]
pub struct SubflowHandles {
    pub workflows: Arc<dyn WorkflowStore>,
    pub engine: super::Engine,
}

/// Ambient handles available to a node execution.
#[derive(Clone)]
pub struct NodeContext {
    /// Absolute deadline of the run, when trigger-initiated.
    pub deadline: Option<Instant>,
    pub node_configs: Arc<dyn NodeConfigStore>,
    pub config_store: Arc<dyn ConfigStore>,
    pub http: Option<Arc<HttpCoupling>>,
    pub subflow: Option<SubflowHandles>,
}

impl NodeContext {
    /// The one dependency an executor may use to fetch shared connection
    /// details.
    pub async fn resolve_config(&self, id: i64) -> Result<NodeConfig, NodeError> {
        self.node_configs
            .get_by_id(id)
            .await
            .map_err(|e| NodeError::Config(format!("failed to resolve config {id}: {e}")))
    }

    /// Time left before the run deadline, if one is set. `Some(ZERO)` means
    /// the deadline already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
