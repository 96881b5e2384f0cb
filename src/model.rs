//! Persistent data shapes: workflows, executions, configs, trigger records.
//!
//! All JSON field names follow the wire format consumed by the canvas UI,
//! so definitions round-trip byte-for-byte through export/import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alias for the untyped mapping that flows along edges.
pub type JsonMap = serde_json::Map<String, Value>;

/// A single node in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    /// Canvas position; presentational only, never consumed by the engine.
    #[serde(rename = "positionX", default)]
    pub position_x: f64,
    #[serde(rename = "positionY", default)]
    pub position_y: f64,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub properties: JsonMap,
}

impl NodeDef {
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn prop_f64(&self, key: &str) -> Option<f64> {
        match self.properties.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn prop_i64(&self, key: &str) -> Option<i64> {
        match self.properties.get(key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn prop_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

/// A directed connection between two nodes. `source_handle` and `label` are
/// the dispatch keys branching nodes (condition/switch) match against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "sourceHandle", default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(rename = "targetHandle", default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The graph stored in the definition column. Not required to be acyclic;
/// the engine's visited set guarantees termination on any finite graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// A row in the workflows table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub definition: Definition,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    /// `running` | `completed` | `failed`
    pub status: String,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One node step within a run. Append-only, ordered by `executed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: i64,
    #[serde(rename = "executionId")]
    pub execution_id: i64,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "nodeType")]
    pub node_type: String,
    /// `success` | `error`
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(rename = "executedAt")]
    pub executed_at: DateTime<Utc>,
}

/// Reusable connection record (Redis server, SMTP account, database, SSH
/// host). Multiple nodes reference the same config by id so connection
/// details are stored once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// e.g. "redis", "email", "database", "ssh"
    #[serde(rename = "type")]
    pub config_type: String,
    #[serde(default)]
    pub config: JsonMap,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl NodeConfig {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Numeric config values arrive either as JSON numbers or strings.
    pub fn get_u16(&self, key: &str) -> Option<u16> {
        match self.config.get(key) {
            Some(Value::Number(n)) => n.as_u64().map(|v| v as u16),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.config.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }
}

/// Namespaced secret/parameter, exposed to running workflows as
/// `config.<key>` in every node's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigStoreEntry {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A cron schedule linked to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    /// 5-field cron expression, e.g. "*/5 * * * *", or a descriptor like "@hourly".
    pub expression: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "lastRunAt", default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "nextRunAt", default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A Redis pub/sub subscription that triggers a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSubscription {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    /// References node_configs (type=redis).
    #[serde(rename = "configId")]
    pub config_id: i64,
    /// Channel name or pattern.
    pub channel: String,
    /// true = PSUBSCRIBE, false = SUBSCRIBE
    #[serde(rename = "isPattern", default)]
    pub is_pattern: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "lastMsgAt", default, skip_serializing_if = "Option::is_none")]
    pub last_msg_at: Option<DateTime<Utc>>,
    #[serde(rename = "msgCount", default)]
    pub msg_count: i64,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// An IMAP polling trigger that runs a workflow for each new email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTrigger {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    #[serde(rename = "configId")]
    pub config_id: i64,
    #[serde(default)]
    pub mailbox: String,
    #[serde(rename = "pollIntervalSec", default)]
    pub poll_interval_sec: u64,
    #[serde(rename = "markSeen", default)]
    pub mark_seen: bool,
    #[serde(rename = "maxFetch", default)]
    pub max_fetch: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "lastPollAt", default, skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(rename = "msgCount", default)]
    pub msg_count: i64,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// An HTTP endpoint that triggers a workflow (Node-RED style http-in).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTrigger {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    /// Path below the `/api/in/` prefix, e.g. "webhook" or "api/v1/events".
    pub path: String,
    /// GET, POST, PUT, DELETE, ...
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// A workflow is executable iff its definition has at least one node and
    /// one of them is a valid entry node.
    pub fn is_executable(&self) -> bool {
        !self.definition.nodes.is_empty()
            && self
                .definition
                .nodes
                .iter()
                .any(|n| crate::engine::is_entry_type(&n.node_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_round_trip() {
        let raw = json!({
            "nodes": [
                {"id": "n1", "type": "start", "label": "Start", "positionX": 10.0, "positionY": 20.0},
                {"id": "n2", "type": "log", "label": "Log", "positionX": 0.0, "positionY": 0.0,
                 "properties": {"message": "hi"}}
            ],
            "edges": [
                {"id": "e1", "source": "n1", "target": "n2", "sourceHandle": "true"}
            ]
        });
        let def: Definition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[1].prop_str("message"), Some("hi"));
        assert_eq!(def.edges[0].source_handle.as_deref(), Some("true"));

        let back = serde_json::to_value(&def).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_prop_accessors_coerce_strings() {
        let node: NodeDef = serde_json::from_value(json!({
            "id": "n", "type": "delay",
            "properties": {"durationMs": "250", "configId": 7}
        }))
        .unwrap();
        assert_eq!(node.prop_f64("durationMs"), Some(250.0));
        assert_eq!(node.prop_i64("configId"), Some(7));
        assert_eq!(node.prop_f64("missing"), None);
    }
}
