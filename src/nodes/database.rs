//! SQL node: runs a query or stored procedure against MySQL or Postgres
//! through a short-lived sqlx `Any` connection. `{{path}}` placeholders in
//! the query text become positional bind parameters, never string splices.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Row};

use super::{forward_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeConfig, NodeDef};
use crate::placeholder::{resolve_parametric, ParamStyle};

const DEFAULT_QUERY_TIMEOUT_MS: f64 = 30_000.0;

pub struct DatabaseNode;

#[async_trait]
impl NodeExecutor for DatabaseNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let config_id = node
            .prop_i64("configId")
            .ok_or_else(|| NodeError::Config("database node: configId is required".to_string()))?;
        let cfg = ctx.resolve_config(config_id).await?;
        if cfg.config_type != "database" {
            return Err(NodeError::Config(format!(
                "database node: config {config_id} is not database type (got {})",
                cfg.config_type
            )));
        }

        let driver = cfg.get_str("driver").filter(|d| !d.is_empty()).unwrap_or("mysql");
        let style = match driver {
            "mysql" => ParamStyle::Question,
            "postgres" => ParamStyle::Dollar,
            other => {
                return Err(NodeError::Config(format!(
                    "database node: unsupported driver {other:?} (use mysql or postgres)"
                )))
            }
        };
        let dsn = build_dsn(driver, &cfg)?;

        let query = node.prop_str("query").unwrap_or("");
        if query.is_empty() {
            return Err(NodeError::Config("database node: query is required".to_string()));
        }
        let mode = node.prop_str("mode").filter(|m| !m.is_empty()).unwrap_or("query");

        let mut timeout_ms = node.prop_f64("timeoutMs").unwrap_or(0.0);
        if timeout_ms <= 0.0 {
            timeout_ms = DEFAULT_QUERY_TIMEOUT_MS;
        }
        let timeout = Duration::from_millis(timeout_ms as u64);

        let (mut exec_query, args) = resolve_parametric(query, &input, style)?;
        if mode == "procedure" {
            exec_query = wrap_procedure(driver, &exec_query);
        }

        let run = async {
            sqlx::any::install_default_drivers();
            let pool = AnyPoolOptions::new()
                .max_connections(1)
                .connect(&dsn)
                .await
                .map_err(|e| NodeError::Execution(format!("database node: open: {e}")))?;

            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map_err(|e| NodeError::Execution(format!("database node: ping: {e}")))?;

            let mut q = sqlx::query(&exec_query);
            for arg in &args {
                q = bind_value(q, arg);
            }
            let rows = q
                .fetch_all(&pool)
                .await
                .map_err(|e| NodeError::Execution(format!("database node: execute: {e}")))?;

            let materialised: Vec<Value> = rows.iter().map(row_to_json).collect();
            pool.close().await;
            Ok::<Vec<Value>, NodeError>(materialised)
        };
        let rows = match tokio::time::timeout(timeout, run).await {
            Ok(r) => r?,
            Err(_) => return Err(NodeError::Timeout),
        };

        let mut output = JsonMap::new();
        output.insert("rowCount".to_string(), json!(rows.len()));
        output.insert("rows".to_string(), Value::Array(rows));
        output.insert("query".to_string(), json!(exec_query));
        forward_input(&mut output, input);
        Ok(output)
    }
}

fn build_dsn(driver: &str, cfg: &NodeConfig) -> Result<String, NodeError> {
    let host = cfg.get_str("host").filter(|h| !h.is_empty()).unwrap_or("127.0.0.1");
    let default_port = if driver == "postgres" { 5432 } else { 3306 };
    let port = cfg.get_u16("port").unwrap_or(default_port);
    let user = cfg
        .get_str("username")
        .filter(|u| !u.is_empty())
        .or_else(|| cfg.get_str("user"))
        .unwrap_or("");
    if user.is_empty() {
        return Err(NodeError::Config("database node: username is required".to_string()));
    }
    let password = cfg.get_str("password").unwrap_or("");
    let database = cfg
        .get_str("database")
        .filter(|d| !d.is_empty())
        .or_else(|| cfg.get_str("db"))
        .unwrap_or("");

    Ok(format!("{driver}://{user}:{password}@{host}:{port}/{database}"))
}

/// Bind a JSON value as the closest SQL type.
fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        other => q.bind(other.to_string()),
    }
}

/// Decode a column by probing the types the Any driver can produce.
fn row_to_json(row: &AnyRow) -> Value {
    let mut map = JsonMap::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    Value::Object(map)
}

/// `procedure` mode accepts a bare procedure name and wraps it as a CALL
/// statement (both supported drivers use CALL).
fn wrap_procedure(_driver: &str, name_or_query: &str) -> String {
    let trimmed = name_or_query.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.to_uppercase().starts_with("CALL ") {
        return trimmed.to_string();
    }
    format!("CALL {trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props};
    use serde_json::json;

    fn db_config(config: serde_json::Value) -> NodeConfig {
        serde_json::from_value(json!({
            "id": 1, "name": "db", "type": "database", "config": config
        }))
        .unwrap()
    }

    #[test]
    fn test_build_dsn_mysql_defaults() {
        let cfg = db_config(json!({"username": "root", "password": "pw", "database": "app"}));
        assert_eq!(build_dsn("mysql", &cfg).unwrap(), "mysql://root:pw@127.0.0.1:3306/app");
    }

    #[test]
    fn test_build_dsn_postgres_port_default() {
        let cfg = db_config(json!({"user": "svc", "db": "app", "host": "db.internal"}));
        assert_eq!(build_dsn("postgres", &cfg).unwrap(), "postgres://svc:@db.internal:5432/app");
    }

    #[test]
    fn test_build_dsn_requires_username() {
        let cfg = db_config(json!({"database": "app"}));
        assert!(build_dsn("mysql", &cfg).is_err());
    }

    #[test]
    fn test_wrap_procedure() {
        assert_eq!(wrap_procedure("mysql", "refresh_totals"), "CALL refresh_totals");
        assert_eq!(wrap_procedure("mysql", "CALL refresh_totals"), "CALL refresh_totals");
        assert_eq!(wrap_procedure("postgres", "refresh_totals()"), "CALL refresh_totals()");
    }

    #[tokio::test]
    async fn test_database_requires_config_and_query() {
        let ctx = ctx().await;
        let node = node_with_props("d", "database", json!({}));
        let err = DatabaseNode.execute(&ctx, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("configId"));

        use crate::store::NodeConfigStore as _;
        let cfg = ctx.node_configs.create(db_config(json!({"username": "u"}))).await.unwrap();
        let node = node_with_props("d", "database", json!({"configId": cfg.id}));
        let err = DatabaseNode.execute(&ctx, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("query is required"));
    }
}
