//! Data-shaping nodes: transform (expression), function (JS sandbox), log.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::expr;
use crate::model::{JsonMap, NodeDef};
use crate::sandbox;

/// Evaluates `properties.expression` and emits `{result, …input}`.
/// No expression means passthrough.
pub struct TransformNode;

#[async_trait]
impl NodeExecutor for TransformNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let expression = node.prop_str("expression").unwrap_or("");
        if expression.is_empty() {
            return Ok(input);
        }

        let result = expr::evaluate(expression, &input)?;
        let mut output = JsonMap::new();
        output.insert("result".to_string(), result);
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Runs `properties.code` in the JavaScript sandbox with the input bound as
/// the global `input`. The script hands data downstream by assigning
/// `returnValue`:
/// - undefined   → `{_stop: true}` (the path ends here)
/// - object      → becomes the whole output
/// - scalar/array → wrapped as `{value: …}`
pub struct FunctionNode;

const DEFAULT_FUNCTION_TIMEOUT_MS: f64 = 10_000.0;

#[async_trait]
impl NodeExecutor for FunctionNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let code = node.prop_str("code").unwrap_or("");
        if code.is_empty() {
            return Err(NodeError::Config("function node: 'code' is required".to_string()));
        }

        let mut timeout_ms = node.prop_f64("timeoutMs").unwrap_or(0.0);
        if timeout_ms <= 0.0 {
            timeout_ms = DEFAULT_FUNCTION_TIMEOUT_MS;
        }

        let outcome =
            sandbox::run_script(code, &input, Duration::from_millis(timeout_ms as u64)).await?;

        match outcome.return_value {
            None => {
                let mut output = JsonMap::new();
                output.insert("_stop".to_string(), json!(true));
                Ok(output)
            }
            Some(Value::Object(map)) => Ok(map),
            Some(other) => {
                let mut output = JsonMap::new();
                output.insert("value".to_string(), other);
                Ok(output)
            }
        }
    }
}

/// Emits `properties.message` (or a rendering of the input) through the
/// host logger.
pub struct LogNode;

#[async_trait]
impl NodeExecutor for LogNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let message = match node.prop_str("message") {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => serde_json::to_string(&input).unwrap_or_default(),
        };

        info!(node_id = %node.id, message = %message, "log node");

        let mut output = JsonMap::new();
        output.insert("logged".to_string(), json!(true));
        output.insert("message".to_string(), json!(message));
        forward_input(&mut output, input);
        Ok(output)
    }
}
