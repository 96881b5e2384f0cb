//! The `flow` node: runs another workflow as a sub-flow of the current run.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};
use crate::store::WorkflowStore;

/// Resolves `properties.workflow_id`, optionally forwards the current input
/// (`pass_input`), and invokes the recursive runner the engine injected.
/// A sub-flow failure fails this node; the sub-flow execution id stays in
/// the output for cross-navigation either way.
pub struct FlowNode;

#[async_trait]
impl NodeExecutor for FlowNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let workflow_id = node.prop_i64("workflow_id").unwrap_or(0);
        if workflow_id == 0 {
            return Err(NodeError::Config("flow node: 'workflow_id' is required".to_string()));
        }

        let Some(subflow) = &ctx.subflow else {
            return Err(NodeError::Config(
                "flow node: sub-flow dependencies not injected".to_string(),
            ));
        };

        let workflow = subflow.workflows.get_by_id(workflow_id).await.map_err(|e| {
            NodeError::Config(format!("flow node: failed to resolve workflow {workflow_id}: {e}"))
        })?;

        let pass_input = node.prop_bool("pass_input").unwrap_or(false);
        let sub_input = if pass_input { Some(input.clone()) } else { None };

        let started = Instant::now();
        let run = subflow
            .engine
            .run_subflow(workflow.clone(), sub_input, ctx.deadline)
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (exec_id, status, error) = match &run {
            Ok(outcome) => (
                outcome.execution_id,
                outcome.status.clone(),
                outcome.error.as_ref().map(|e| e.to_string()),
            ),
            // The sub-flow never started (e.g. empty definition).
            Err(e) => (0, "failed".to_string(), Some(e.to_string())),
        };

        let mut output = JsonMap::new();
        output.insert("subflow_execution_id".to_string(), json!(exec_id));
        output.insert("subflow_workflow_id".to_string(), json!(workflow_id));
        output.insert("subflow_name".to_string(), json!(workflow.name));
        output.insert("subflow_status".to_string(), json!(status));
        output.insert("subflow_duration_ms".to_string(), json!(duration_ms));
        if let Some(err) = &error {
            output.insert("subflow_error".to_string(), Value::String(err.clone()));
        }
        forward_input(&mut output, input);

        if let Some(err) = error {
            // The execution id stays in the message so the parent's step log
            // can cross-navigate into the sub-flow's own logs.
            return Err(NodeError::Execution(format!(
                "sub-flow {} failed (execution {exec_id}): {err}",
                workflow.name
            )));
        }
        Ok(output)
    }
}
