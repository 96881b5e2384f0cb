//! Built-in node executors and the registry that maps type strings to them.

pub mod config_store;
pub mod control_flow;
pub mod cron;
pub mod data_transform;
pub mod database;
pub mod email;
pub mod exec;
pub mod fs;
pub mod http;
pub mod redis;
pub mod registry;
pub mod ssh;
pub mod subflow;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};

pub use registry::NodeRegistry;

/// The uniform call contract every node type implements.
///
/// `input` is the merged output of all parent edges plus the initial trigger
/// input and the `config` store snapshot. The returned map is forwarded to
/// children; `_branch` and `_stop` keys are control signals interpreted by
/// the engine.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError>;
}

/// Conventional passthrough: copy input keys the executor did not set, so
/// downstream nodes observe the union. Explicit output keys win.
pub(crate) fn forward_input(output: &mut JsonMap, input: JsonMap) {
    for (k, v) in input {
        output.entry(k).or_insert(v);
    }
}

/// A string that may live in the node properties or, failing that, in the
/// upstream input (the common pattern for `to`, `path`, `command`, ...).
pub(crate) fn string_prop_or_input(node: &NodeDef, input: &JsonMap, key: &str) -> String {
    if let Some(v) = node.prop_str(key) {
        if !v.is_empty() {
            return v.to_string();
        }
    }
    match input.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;

    use crate::engine::NodeContext;
    use crate::model::{JsonMap, NodeDef};
    use crate::store::Stores;

    /// A context wired to a fresh in-memory store, without subflow handles.
    pub(crate) async fn ctx() -> NodeContext {
        let stores = Stores::in_memory();
        NodeContext {
            deadline: None,
            node_configs: stores.node_configs.clone(),
            config_store: stores.config_store.clone(),
            http: None,
            subflow: None,
        }
    }

    pub(crate) fn node_with_props(id: &str, node_type: &str, props: Value) -> NodeDef {
        NodeDef {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: id.to_string(),
            position_x: 0.0,
            position_y: 0.0,
            properties: props.as_object().cloned().unwrap_or_default(),
        }
    }

    pub(crate) fn obj(v: Value) -> JsonMap {
        v.as_object().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forward_input_does_not_clobber() {
        let mut output: JsonMap = json!({"result": 1}).as_object().cloned().unwrap();
        let input: JsonMap = json!({"result": 2, "extra": "x"}).as_object().cloned().unwrap();
        forward_input(&mut output, input);
        assert_eq!(output.get("result"), Some(&json!(1)));
        assert_eq!(output.get("extra"), Some(&json!("x")));
    }

    #[test]
    fn test_string_prop_or_input_prefers_property() {
        let node: NodeDef = serde_json::from_value(json!({
            "id": "n", "type": "email", "properties": {"to": "a@example.com"}
        }))
        .unwrap();
        let input: JsonMap = json!({"to": "b@example.com"}).as_object().cloned().unwrap();
        assert_eq!(string_prop_or_input(&node, &input, "to"), "a@example.com");
        assert_eq!(string_prop_or_input(&node, &input, "cc"), "");
    }
}
