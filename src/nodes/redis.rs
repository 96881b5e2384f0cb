//! Redis nodes: one-shot commands against a shared connection config, and
//! the pub/sub trigger-entry passthrough.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde_json::{json, Value};

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeConfig, NodeDef};

/// Build a client from a node config of type `redis` and validate the
/// connection with a PING. Connections are per-execution; trigger
/// subscriptions hold their own long-lived ones.
pub async fn connect(cfg: &NodeConfig) -> Result<redis::aio::MultiplexedConnection, NodeError> {
    if cfg.config_type != "redis" {
        return Err(NodeError::Config(format!(
            "config {} is not redis type (got {})",
            cfg.id, cfg.config_type
        )));
    }
    let client = redis::Client::open(connection_url(cfg))
        .map_err(|e| NodeError::Config(format!("redis client: {e}")))?;
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| NodeError::Execution(format!("redis connection failed: {e}")))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| NodeError::Execution(format!("redis connection failed: {e}")))?;
    Ok(conn)
}

/// redis://[:password@]host:port/db from the shared config shape.
pub fn connection_url(cfg: &NodeConfig) -> String {
    let host = cfg.get_str("host").filter(|h| !h.is_empty()).unwrap_or("127.0.0.1");
    let port = cfg.get_u16("port").unwrap_or(6379);
    let db = cfg.get_i64("db").unwrap_or(0);
    match cfg.get_str("password").filter(|p| !p.is_empty()) {
        Some(password) => format!("redis://:{password}@{host}:{port}/{db}"),
        None => format!("redis://{host}:{port}/{db}"),
    }
}

/// One Redis operation per call, chosen by `properties.operation`. Key and
/// value fall back to the upstream input when absent from properties.
pub struct RedisNode;

#[async_trait]
impl NodeExecutor for RedisNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let config_id = node
            .prop_i64("configId")
            .ok_or_else(|| NodeError::Config("redis node: configId is required".to_string()))?;
        let cfg = ctx.resolve_config(config_id).await?;
        let mut conn = connect(&cfg).await?;

        let operation = node.prop_str("operation").unwrap_or("").to_uppercase();
        if operation.is_empty() {
            return Err(NodeError::Config("redis node: operation is required".to_string()));
        }

        let mut key = node.prop_str("key").unwrap_or("").to_string();
        if key.is_empty() {
            if let Some(Value::String(k)) = input.get("key") {
                key = k.clone();
            }
        }
        let mut value = node.prop_str("value").unwrap_or("").to_string();
        if value.is_empty() {
            if let Some(Value::String(v)) = input.get("value") {
                value = v.clone();
            }
        }
        let field = node.prop_str("field").unwrap_or("").to_string();

        let mut output = JsonMap::new();
        output.insert("operation".to_string(), json!(operation));
        output.insert("key".to_string(), json!(key));

        let op_err =
            |op: &str, e: redis::RedisError| NodeError::Execution(format!("redis {op} failed: {e}"));

        match operation.as_str() {
            "GET" => {
                require_key(&operation, &key)?;
                let val: Option<String> = conn.get(&key).await.map_err(|e| op_err("GET", e))?;
                match val {
                    None => {
                        output.insert("result".to_string(), Value::Null);
                        output.insert("exists".to_string(), json!(false));
                    }
                    Some(v) => {
                        if let Ok(parsed) = serde_json::from_str::<Value>(&v) {
                            output.insert("json".to_string(), parsed);
                        }
                        output.insert("result".to_string(), json!(v));
                        output.insert("exists".to_string(), json!(true));
                    }
                }
            }
            "SET" => {
                require_key(&operation, &key)?;
                let ttl_ms = node.prop_f64("ttl").unwrap_or(0.0);
                if ttl_ms > 0.0 {
                    let _: () = conn
                        .pset_ex(&key, &value, ttl_ms as u64)
                        .await
                        .map_err(|e| op_err("SET", e))?;
                } else {
                    let _: () = conn.set(&key, &value).await.map_err(|e| op_err("SET", e))?;
                }
                output.insert("result".to_string(), json!("OK"));
            }
            "DEL" => {
                require_key(&operation, &key)?;
                let deleted: i64 = conn.del(&key).await.map_err(|e| op_err("DEL", e))?;
                output.insert("result".to_string(), json!(deleted));
            }
            "KEYS" => {
                let pattern = if key.is_empty() { "*" } else { key.as_str() };
                let keys: Vec<String> = conn.keys(pattern).await.map_err(|e| op_err("KEYS", e))?;
                output.insert("count".to_string(), json!(keys.len()));
                output.insert("result".to_string(), json!(keys));
            }
            "HGET" => {
                require_key_field(&operation, &key, &field)?;
                let val: Option<String> =
                    conn.hget(&key, &field).await.map_err(|e| op_err("HGET", e))?;
                output.insert("exists".to_string(), json!(val.is_some()));
                output.insert("result".to_string(), val.map(Value::String).unwrap_or(Value::Null));
            }
            "HSET" => {
                require_key_field(&operation, &key, &field)?;
                let _: () = conn
                    .hset(&key, &field, &value)
                    .await
                    .map_err(|e| op_err("HSET", e))?;
                output.insert("result".to_string(), json!("OK"));
            }
            "HGETALL" => {
                require_key(&operation, &key)?;
                let map: std::collections::HashMap<String, String> =
                    conn.hgetall(&key).await.map_err(|e| op_err("HGETALL", e))?;
                output.insert("result".to_string(), json!(map));
            }
            "HDEL" => {
                require_key_field(&operation, &key, &field)?;
                let deleted: i64 =
                    conn.hdel(&key, &field).await.map_err(|e| op_err("HDEL", e))?;
                output.insert("result".to_string(), json!(deleted));
            }
            "LPUSH" => {
                require_key_value(&operation, &key, &value)?;
                let len: i64 = conn.lpush(&key, &value).await.map_err(|e| op_err("LPUSH", e))?;
                output.insert("result".to_string(), json!(len));
            }
            "RPUSH" => {
                require_key_value(&operation, &key, &value)?;
                let len: i64 = conn.rpush(&key, &value).await.map_err(|e| op_err("RPUSH", e))?;
                output.insert("result".to_string(), json!(len));
            }
            "LPOP" => {
                require_key(&operation, &key)?;
                let val: Option<String> =
                    conn.lpop(&key, None).await.map_err(|e| op_err("LPOP", e))?;
                output.insert("result".to_string(), val.map(Value::String).unwrap_or(Value::Null));
            }
            "RPOP" => {
                require_key(&operation, &key)?;
                let val: Option<String> =
                    conn.rpop(&key, None).await.map_err(|e| op_err("RPOP", e))?;
                output.insert("result".to_string(), val.map(Value::String).unwrap_or(Value::Null));
            }
            "LRANGE" => {
                require_key(&operation, &key)?;
                let start = node.prop_i64("start").unwrap_or(0) as isize;
                let stop = node.prop_i64("stop").unwrap_or(-1) as isize;
                let vals: Vec<String> = conn
                    .lrange(&key, start, stop)
                    .await
                    .map_err(|e| op_err("LRANGE", e))?;
                output.insert("count".to_string(), json!(vals.len()));
                output.insert("result".to_string(), json!(vals));
            }
            "PUBLISH" => {
                let channel = match node.prop_str("channel").filter(|c| !c.is_empty()) {
                    Some(c) => c.to_string(),
                    None => key.clone(),
                };
                if channel.is_empty() {
                    return Err(NodeError::Config("redis PUBLISH: channel is required".to_string()));
                }
                let receivers: i64 = conn
                    .publish(&channel, &value)
                    .await
                    .map_err(|e| op_err("PUBLISH", e))?;
                output.insert("channel".to_string(), json!(channel));
                output.insert("result".to_string(), json!(receivers));
            }
            "INCR" => {
                require_key(&operation, &key)?;
                let val: i64 = conn.incr(&key, 1).await.map_err(|e| op_err("INCR", e))?;
                output.insert("result".to_string(), json!(val));
            }
            "DECR" => {
                require_key(&operation, &key)?;
                let val: i64 = conn.decr(&key, 1).await.map_err(|e| op_err("DECR", e))?;
                output.insert("result".to_string(), json!(val));
            }
            "EXPIRE" => {
                require_key(&operation, &key)?;
                let ttl_ms = node.prop_f64("ttl").unwrap_or(0.0);
                if ttl_ms <= 0.0 {
                    return Err(NodeError::Config("redis EXPIRE: ttl is required".to_string()));
                }
                let ok: bool = conn
                    .pexpire(&key, ttl_ms as i64)
                    .await
                    .map_err(|e| op_err("EXPIRE", e))?;
                output.insert("result".to_string(), json!(ok));
            }
            "TTL" => {
                require_key(&operation, &key)?;
                let ttl_ms: i64 = conn.pttl(&key).await.map_err(|e| op_err("TTL", e))?;
                output.insert("result".to_string(), json!(ttl_ms));
            }
            "EXISTS" => {
                require_key(&operation, &key)?;
                let count: i64 = conn.exists(&key).await.map_err(|e| op_err("EXISTS", e))?;
                output.insert("count".to_string(), json!(count));
                output.insert("result".to_string(), json!(count > 0));
            }
            "SADD" => {
                require_key_value(&operation, &key, &value)?;
                let added: i64 = conn.sadd(&key, &value).await.map_err(|e| op_err("SADD", e))?;
                output.insert("result".to_string(), json!(added));
            }
            "SMEMBERS" => {
                require_key(&operation, &key)?;
                let members: Vec<String> =
                    conn.smembers(&key).await.map_err(|e| op_err("SMEMBERS", e))?;
                output.insert("count".to_string(), json!(members.len()));
                output.insert("result".to_string(), json!(members));
            }
            other => {
                return Err(NodeError::Config(format!(
                    "redis node: unsupported operation: {other}"
                )));
            }
        }

        forward_input(&mut output, input);
        Ok(output)
    }
}

fn require_key(op: &str, key: &str) -> Result<(), NodeError> {
    if key.is_empty() {
        return Err(NodeError::Config(format!("redis {op}: key is required")));
    }
    Ok(())
}

fn require_key_field(op: &str, key: &str, field: &str) -> Result<(), NodeError> {
    if key.is_empty() || field.is_empty() {
        return Err(NodeError::Config(format!("redis {op}: key and field are required")));
    }
    Ok(())
}

fn require_key_value(op: &str, key: &str, value: &str) -> Result<(), NodeError> {
    if key.is_empty() || value.is_empty() {
        return Err(NodeError::Config(format!("redis {op}: key and value are required")));
    }
    Ok(())
}

/// Trigger-entry passthrough for pub/sub flows. The subscriber service
/// injects the actual message; a manual run gets a synthetic one.
pub struct RedisSubscribeNode;

#[async_trait]
impl NodeExecutor for RedisSubscribeNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let channel = node.prop_str("channel").unwrap_or("");
        let pattern = node.prop_str("pattern").unwrap_or("");

        let mut output = JsonMap::new();
        output.insert("triggered".to_string(), json!(true));
        output.insert("triggeredAt".to_string(), json!(Utc::now().to_rfc3339()));
        forward_input(&mut output, input);

        // The live message carries the real channel/pattern; the node
        // properties only fill the gaps on a manual run.
        if !channel.is_empty() {
            output.entry("channel".to_string()).or_insert(json!(channel));
        }
        if !pattern.is_empty() {
            output.entry("pattern".to_string()).or_insert(json!(pattern));
        }

        if !output.contains_key("message") {
            output.insert(
                "message".to_string(),
                json!(format!("redis_subscribe trigger (channel={channel})")),
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props, obj};

    #[test]
    fn test_connection_url_shapes() {
        let cfg: NodeConfig = serde_json::from_value(json!({
            "id": 1, "name": "r", "type": "redis",
            "config": {"host": "redis.internal", "port": 6380, "password": "pw", "db": 2}
        }))
        .unwrap();
        assert_eq!(connection_url(&cfg), "redis://:pw@redis.internal:6380/2");

        let bare: NodeConfig = serde_json::from_value(json!({
            "id": 2, "name": "r", "type": "redis", "config": {}
        }))
        .unwrap();
        assert_eq!(connection_url(&bare), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_port_as_string_is_accepted() {
        let cfg: NodeConfig = serde_json::from_value(json!({
            "id": 1, "name": "r", "type": "redis", "config": {"port": "6390"}
        }))
        .unwrap();
        assert_eq!(connection_url(&cfg), "redis://127.0.0.1:6390/0");
    }

    #[tokio::test]
    async fn test_redis_node_requires_config_id() {
        let node = node_with_props("r", "redis", json!({"operation": "GET", "key": "k"}));
        let err = RedisNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("configId"));
    }

    #[tokio::test]
    async fn test_subscribe_passthrough_keeps_injected_message() {
        let node = node_with_props("s", "redis_subscribe", json!({"channel": "events"}));
        let out = RedisSubscribeNode
            .execute(&ctx().await, &node, obj(json!({"message": "hello", "channel": "events/x"})))
            .await
            .unwrap();
        assert_eq!(out.get("message"), Some(&json!("hello")));
        // Injected channel wins over the node property.
        assert_eq!(out.get("channel"), Some(&json!("events/x")));
        assert_eq!(out.get("triggered"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_subscribe_synthesizes_message_on_manual_run() {
        let node = node_with_props("s", "redis_subscribe", json!({"channel": "events"}));
        let out = RedisSubscribeNode
            .execute(&ctx().await, &node, JsonMap::new())
            .await
            .unwrap();
        assert!(out.get("message").and_then(Value::as_str).unwrap().contains("events"));
    }
}
