//! Cron trigger-entry node. Validates the expression and reports the firing
//! times; the schedule itself is owned by the scheduler supervisor.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::NodeExecutor;
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};
use crate::triggers::scheduler::{next_occurrence, parse_expression};

pub struct CronNode;

#[async_trait]
impl NodeExecutor for CronNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let expression = node
            .prop_str("expression")
            .filter(|e| !e.is_empty())
            .unwrap_or("* * * * *");

        let schedule = parse_expression(expression)
            .map_err(|e| NodeError::Config(format!("cron node: invalid expression {expression:?}: {e}")))?;

        let now = Utc::now();
        let timezone = node.prop_str("timezone").filter(|t| !t.is_empty()).unwrap_or("UTC");

        let mut output = JsonMap::new();
        output.insert("triggered".to_string(), json!(true));
        output.insert("expression".to_string(), json!(expression));
        output.insert("timezone".to_string(), json!(timezone));
        output.insert("triggeredAt".to_string(), json!(now.to_rfc3339()));
        if let Some(next) = next_occurrence(&schedule, now) {
            output.insert("nextRun".to_string(), json!(next.to_rfc3339()));
        }
        if let Some(payload) = node.prop_str("payload").filter(|p| !p.is_empty()) {
            output.insert("payload".to_string(), json!(payload));
        }

        for (k, v) in input {
            output.entry(k).or_insert(v);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props, obj};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_reports_next_run() {
        let node = node_with_props("c", "cron", json!({"expression": "*/5 * * * *"}));
        let out = CronNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        assert_eq!(out.get("triggered"), Some(&json!(true)));
        assert!(out.contains_key("nextRun"));
        assert_eq!(out.get("expression"), Some(&json!("*/5 * * * *")));
    }

    #[tokio::test]
    async fn test_invalid_expression_fails() {
        let node = node_with_props("c", "cron", json!({"expression": "not a cron"}));
        assert!(CronNode.execute(&ctx().await, &node, JsonMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_descriptor_shortcut() {
        let node = node_with_props("c", "cron", json!({"expression": "@hourly"}));
        let out = CronNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        assert!(out.get("nextRun").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn test_forwards_input() {
        let node = node_with_props("c", "cron", json!({}));
        let out = CronNode
            .execute(&ctx().await, &node, obj(json!({"carried": 1})))
            .await
            .unwrap();
        assert_eq!(out.get("carried"), Some(&json!(1)));
    }
}
