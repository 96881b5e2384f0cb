//! The workflow executor: walks a definition graph breadth-first, propagates
//! edge data, dispatches to the node registry, persists step logs, and
//! streams progress to live observers.
//!
//! One run is one sequential traversal; parallelism lives a level up, in the
//! trigger supervisors that start runs concurrently.

pub mod context;
pub mod debug;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::error::{EngineError, NodeError};
use crate::expr::is_truthy;
use crate::model::{EdgeDef, ExecutionLog, JsonMap, NodeDef, Workflow};
use crate::nodes::NodeRegistry;
use crate::store::{ConfigStore, ExecutionLogStore, ExecutionStore, Stores};

pub use context::{HttpCoupling, NodeContext, StoredResponse, SubflowHandles};
pub use debug::{debug_channel, DebugEvent, DebugSink};

/// Node types that may start a traversal.
const ENTRY_TYPES: [&str; 5] = ["start", "cron", "redis_subscribe", "email_receive", "http_in"];

pub fn is_entry_type(node_type: &str) -> bool {
    ENTRY_TYPES.contains(&node_type)
}

/// Options for one run. All fields are optional; triggers fill in what they
/// have (initial input, HTTP coupling, debug sink, deadline).
#[derive(Default)]
pub struct RunOptions {
    pub initial_input: Option<JsonMap>,
    pub http: Option<Arc<HttpCoupling>>,
    pub debug: Option<DebugSink>,
    pub timeout: Option<Duration>,
}

/// What one run produced. The execution id is always present, even for
/// failed runs, so callers can correlate logs.
#[derive(Debug)]
pub struct RunOutcome {
    pub execution_id: i64,
    /// "completed" | "failed"
    pub status: String,
    pub error: Option<EngineError>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// The engine owns cheap handles only; clone freely.
#[derive(Clone)]
pub struct Engine {
    stores: Stores,
    registry: Arc<NodeRegistry>,
}

impl Engine {
    pub fn new(stores: Stores, registry: Arc<NodeRegistry>) -> Self {
        Engine { stores, registry }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run a workflow with no initial input.
    pub async fn run_workflow(&self, workflow: &Workflow) -> Result<RunOutcome, EngineError> {
        self.run_with(workflow, RunOptions::default()).await
    }

    /// Run a workflow with initial input injected into the entry node.
    pub async fn run_workflow_with_input(
        &self,
        workflow: &Workflow,
        initial_input: Option<JsonMap>,
    ) -> Result<RunOutcome, EngineError> {
        self.run_with(
            workflow,
            RunOptions {
                initial_input,
                ..Default::default()
            },
        )
        .await
    }

    /// Run a workflow coupled to the HTTP request that triggered it.
    /// Returns the outcome plus whether an `http_out` node wrote a response.
    pub async fn run_workflow_for_http(
        &self,
        workflow: &Workflow,
        initial_input: JsonMap,
        coupling: Arc<HttpCoupling>,
        timeout: Option<Duration>,
    ) -> Result<(RunOutcome, bool), EngineError> {
        let outcome = self
            .run_with(
                workflow,
                RunOptions {
                    initial_input: Some(initial_input),
                    http: Some(coupling.clone()),
                    timeout,
                    ..Default::default()
                },
            )
            .await?;
        let sent = coupling.sent();
        Ok((outcome, sent))
    }

    /// Recursive entry point for the `flow` node. Boxed so the async
    /// recursion has a known size.
    pub(crate) fn run_subflow(
        &self,
        workflow: Workflow,
        input: Option<JsonMap>,
        deadline: Option<Instant>,
    ) -> BoxFuture<'_, Result<RunOutcome, EngineError>> {
        Box::pin(async move {
            let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.run_with(
                &workflow,
                RunOptions {
                    initial_input: input,
                    timeout,
                    ..Default::default()
                },
            )
            .await
        })
    }

    /// Execute a workflow to completion.
    ///
    /// # Errors
    /// `Err` is returned only when no execution row could be created (empty
    /// definition, store failure). Every other failure finishes the row as
    /// `failed` and comes back inside [`RunOutcome`].
    pub async fn run_with(
        &self,
        workflow: &Workflow,
        opts: RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let def = &workflow.definition;
        if def.nodes.is_empty() {
            return Err(EngineError::EmptyDefinition);
        }

        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let exec = self
            .stores
            .executions
            .create(workflow.id)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        let exec_id = exec.id;
        debug::emit(opts.debug.as_ref(), DebugEvent::started(exec_id));

        let node_map: HashMap<&str, &NodeDef> =
            def.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut adjacency: HashMap<&str, Vec<&EdgeDef>> = HashMap::new();
        for edge in &def.edges {
            adjacency.entry(edge.source.as_str()).or_default().push(edge);
        }

        // First entry-capable node in definition order starts the walk.
        let entry = def.nodes.iter().find(|n| is_entry_type(&n.node_type));
        let Some(entry) = entry else {
            return Ok(self
                .finish(exec_id, EngineError::NoEntryNode, opts.debug.as_ref())
                .await);
        };

        // Copy of the config store taken at run start; mid-run writes are
        // not visible to this run.
        let config_snapshot = self.config_snapshot().await;

        let ctx = NodeContext {
            deadline,
            node_configs: self.stores.node_configs.clone(),
            config_store: self.stores.config_store.clone(),
            http: opts.http.clone(),
            subflow: Some(SubflowHandles {
                workflows: self.stores.workflows.clone(),
                engine: self.clone(),
            }),
        };

        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(entry.id.clone());
        let mut visited: HashSet<String> = HashSet::new();
        let mut outputs: HashMap<String, JsonMap> = HashMap::new();
        // Consecutive continue-node deferrals since the last real step;
        // once every queued entry has been deferred we are livelocked.
        let mut deferrals = 0usize;

        while let Some(current) = queue.pop_front() {
            if visited.contains(&current) {
                continue;
            }
            let Some(&node) = node_map.get(current.as_str()) else {
                // Dangling edge target; skip.
                continue;
            };

            // Deferred rendezvous: a continue node waits until the node it
            // names has been visited.
            if node.node_type == "continue" {
                let after = node.prop_str("after_node_id").unwrap_or("");
                if !after.is_empty() && !visited.contains(after) {
                    let unreachable = !node_map.contains_key(after) || deferrals > queue.len();
                    if unreachable {
                        let err = EngineError::ContinueUnreachable {
                            node_id: node.id.clone(),
                            after: after.to_string(),
                        };
                        self.log_step(exec_id, node, None, None, Some(&err.to_string())).await;
                        debug::emit(
                            opts.debug.as_ref(),
                            DebugEvent::node(exec_id, &node.id, &node.node_type, &node.label, "error", "", "", &err.to_string()),
                        );
                        return Ok(self.finish(exec_id, err, opts.debug.as_ref()).await);
                    }
                    deferrals += 1;
                    queue.push_back(current);
                    continue;
                }
            }

            visited.insert(current.clone());
            deferrals = 0;

            let Some(executor) = self.registry.get(&node.node_type) else {
                let err = EngineError::UnknownNodeType(node.node_type.clone());
                self.log_step(exec_id, node, None, None, Some(&err.to_string())).await;
                debug::emit(
                    opts.debug.as_ref(),
                    DebugEvent::node(exec_id, &node.id, &node.node_type, &node.label, "error", "", "", &err.to_string()),
                );
                return Ok(self.finish(exec_id, err, opts.debug.as_ref()).await);
            };

            // Input: initial input on the entry node, then the union of all
            // parent outputs (last-processed parent wins on key collision),
            // then the config snapshot.
            let mut input = JsonMap::new();
            if current == entry.id {
                if let Some(initial) = &opts.initial_input {
                    input.extend(initial.clone());
                }
            }
            for edge in &def.edges {
                if edge.target == current {
                    if let Some(parent_output) = outputs.get(&edge.source) {
                        input.extend(parent_output.clone());
                    }
                }
            }
            input.insert("config".to_string(), Value::Object(config_snapshot.clone()));

            let input_json = serde_json::to_string(&input).unwrap_or_default();
            let result = match ctx.remaining() {
                Some(left) if left.is_zero() => Err(NodeError::Timeout),
                Some(left) => match tokio::time::timeout(left, executor.execute(&ctx, node, input)).await {
                    Ok(r) => r,
                    Err(_) => Err(NodeError::Timeout),
                },
                None => executor.execute(&ctx, node, input).await,
            };

            match result {
                Err(node_err) => {
                    self.log_step(exec_id, node, Some(&input_json), None, Some(&node_err.to_string()))
                        .await;
                    debug::emit(
                        opts.debug.as_ref(),
                        DebugEvent::node(
                            exec_id, &node.id, &node.node_type, &node.label,
                            "error", &input_json, "", &node_err.to_string(),
                        ),
                    );
                    let err = EngineError::node_failed(&node.id, &node.node_type, node_err);
                    return Ok(self.finish(exec_id, err, opts.debug.as_ref()).await);
                }
                Ok(output) => {
                    let output_json = serde_json::to_string(&output).unwrap_or_default();
                    self.log_step(exec_id, node, Some(&input_json), Some(&output_json), None).await;
                    debug::emit(
                        opts.debug.as_ref(),
                        DebugEvent::node(
                            exec_id, &node.id, &node.node_type, &node.label,
                            "success", &input_json, &output_json, "",
                        ),
                    );

                    let stopped = output.get("_stop").map(is_truthy).unwrap_or(false);
                    let branch = output
                        .get("_branch")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    outputs.insert(current.clone(), output);

                    // The response is out; nothing downstream can add to it.
                    if opts.http.as_ref().is_some_and(|h| h.sent()) {
                        break;
                    }
                    if stopped {
                        continue;
                    }
                    if let Some(edges) = adjacency.get(current.as_str()) {
                        let is_branching =
                            node.node_type == "condition" || node.node_type == "switch";
                        for edge in edges {
                            if is_branching {
                                let matches = branch.as_deref().is_some_and(|b| {
                                    edge.source_handle.as_deref() == Some(b)
                                        || edge.label.as_deref() == Some(b)
                                });
                                if !matches {
                                    continue;
                                }
                            }
                            queue.push_back(edge.target.clone());
                        }
                    }
                }
            }
        }

        if let Err(e) = self.stores.executions.finish(exec_id, "completed", "").await {
            warn!(execution_id = exec_id, error = %e, "failed to finish execution row");
        }
        debug::emit(opts.debug.as_ref(), DebugEvent::finished(exec_id, "completed", ""));
        Ok(RunOutcome {
            execution_id: exec_id,
            status: "completed".to_string(),
            error: None,
        })
    }

    async fn finish(&self, exec_id: i64, err: EngineError, sink: Option<&DebugSink>) -> RunOutcome {
        let msg = err.to_string();
        if let Err(e) = self.stores.executions.finish(exec_id, "failed", &msg).await {
            warn!(execution_id = exec_id, error = %e, "failed to finish execution row");
        }
        debug::emit(sink, DebugEvent::finished(exec_id, "failed", &msg));
        RunOutcome {
            execution_id: exec_id,
            status: "failed".to_string(),
            error: Some(err),
        }
    }

    async fn config_snapshot(&self) -> JsonMap {
        match self.stores.config_store.list().await {
            Ok(entries) => entries
                .into_iter()
                .map(|e| (e.key, Value::String(e.value)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "config store snapshot failed; injecting empty config");
                JsonMap::new()
            }
        }
    }

    /// Step logs are best-effort: a failed write must not fail the run.
    async fn log_step(
        &self,
        exec_id: i64,
        node: &NodeDef,
        input: Option<&str>,
        output: Option<&str>,
        error: Option<&str>,
    ) {
        let log = ExecutionLog {
            id: 0,
            execution_id: exec_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: if error.is_some() { "error" } else { "success" }.to_string(),
            input: input.unwrap_or("").to_string(),
            output: output.unwrap_or("").to_string(),
            error: error.unwrap_or("").to_string(),
            executed_at: Utc::now(),
        };
        if let Err(e) = self.stores.execution_logs.append(log).await {
            warn!(execution_id = exec_id, node_id = %node.id, error = %e, "failed to append step log");
        }
    }
}
