//! Control-flow nodes: start, end, condition, switch, continue, delay.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::expr;
use crate::model::{JsonMap, NodeDef};
use crate::placeholder::stringify;

/// Entry node: forwards whatever the trigger injected.
pub struct StartNode;

#[async_trait]
impl NodeExecutor for StartNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        _node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        if input.is_empty() {
            let mut output = JsonMap::new();
            output.insert("started".to_string(), json!(true));
            return Ok(output);
        }
        Ok(input)
    }
}

/// Terminal in effect only because no edges typically leave it.
pub struct EndNode;

#[async_trait]
impl NodeExecutor for EndNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        _node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let mut output = JsonMap::new();
        output.insert("finished".to_string(), json!(true));
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Evaluates `properties.expression` over the input map and routes to the
/// "true" or "false" branch.
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let expression = node.prop_str("expression").unwrap_or("");
        if expression.is_empty() {
            return Err(NodeError::Config("condition node: expression is required".to_string()));
        }

        let result = expr::evaluate(expression, &input)?;
        let branch = if result == Value::Bool(true) { "true" } else { "false" };

        let mut output = JsonMap::new();
        output.insert("_branch".to_string(), json!(branch));
        output.insert("result".to_string(), result);
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Evaluates an expression and matches its stringified result against
/// `properties.cases[*].value`; routes to the first matching `label`, or
/// "default".
pub struct SwitchNode;

#[async_trait]
impl NodeExecutor for SwitchNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let expression = node.prop_str("expression").unwrap_or("");
        if expression.is_empty() {
            return Err(NodeError::Config("switch node: 'expression' is required".to_string()));
        }

        let result = expr::evaluate(expression, &input)?;
        let result_str = stringify(&result);

        let mut matched = "default".to_string();
        if let Some(Value::Array(cases)) = node.properties.get("cases") {
            for case in cases {
                let Some(case) = case.as_object() else { continue };
                let case_value = case.get("value").map(stringify).unwrap_or_default();
                let label = match case.get("label").and_then(Value::as_str) {
                    Some(l) if !l.is_empty() => l.to_string(),
                    _ => case_value.clone(),
                };
                if case_value == result_str {
                    matched = label;
                    break;
                }
            }
        }

        let mut output = JsonMap::new();
        output.insert("_branch".to_string(), json!(matched));
        output.insert("matched".to_string(), json!(matched != "default"));
        output.insert("result".to_string(), result);
        output.insert("resultStr".to_string(), json!(result_str));
        output.insert("expression".to_string(), json!(expression));
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Declarative rendezvous: the engine defers this node until the node named
/// in `after_node_id` has been visited. Execution itself is a passthrough.
pub struct ContinueNode;

#[async_trait]
impl NodeExecutor for ContinueNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        _node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let mut output = JsonMap::new();
        output.insert("continued".to_string(), json!(true));
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Sleeps `properties.durationMs` (default 1000 ms). Cancellation arrives
/// through the engine's run deadline.
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        // Missing or negative falls back to the default; an explicit 0 runs
        // without sleeping.
        let duration_ms = match node.prop_f64("durationMs") {
            Some(v) if v >= 0.0 => v,
            _ => 1000.0,
        };
        if duration_ms > 0.0 {
            tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
        }

        let mut output = JsonMap::new();
        output.insert("delayed".to_string(), json!(true));
        output.insert("delayMs".to_string(), json!(duration_ms));
        forward_input(&mut output, input);
        Ok(output)
    }
}
