//! Config store access nodes, using the handle carried on the run context.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};
use crate::placeholder::stringify;
use crate::store::ConfigStore;

/// Reads one key from the config store.
pub struct GetConfigStoreNode;

#[async_trait]
impl NodeExecutor for GetConfigStoreNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        _input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let key = node.prop_str("key").unwrap_or("");
        if key.is_empty() {
            return Err(NodeError::Config("get_config_store: key is required".to_string()));
        }
        let value = ctx
            .config_store
            .get(key)
            .await
            .map_err(|e| NodeError::Execution(format!("get_config_store: {e}")))?
            .ok_or_else(|| NodeError::Config(format!("get_config_store: key {key:?} not found")))?;

        let mut output = JsonMap::new();
        output.insert("value".to_string(), json!(value));
        output.insert("key".to_string(), json!(key));
        Ok(output)
    }
}

/// Writes one key to the config store. The new value is visible to later
/// runs; the current run keeps its snapshot.
pub struct SetConfigStoreNode;

#[async_trait]
impl NodeExecutor for SetConfigStoreNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let key = node.prop_str("key").unwrap_or("");
        if key.is_empty() {
            return Err(NodeError::Config("set_config_store: key is required".to_string()));
        }

        // Value from the node property, else from input["value"].
        let mut value = node.prop_str("value").unwrap_or("").to_string();
        if value.is_empty() {
            if let Some(v) = input.get("value") {
                value = match v {
                    Value::String(s) => s.clone(),
                    other => stringify(other),
                };
            }
        }
        let description = node.prop_str("description").unwrap_or("");

        ctx.config_store
            .set(key, &value, description)
            .await
            .map_err(|e| NodeError::Execution(format!("set_config_store: {e}")))?;

        let mut output = JsonMap::new();
        output.insert("_config_store_key".to_string(), json!(key));
        output.insert("_config_store_set".to_string(), json!(true));
        forward_input(&mut output, input);
        Ok(output)
    }
}
