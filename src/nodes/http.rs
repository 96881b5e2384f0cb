//! HTTP-facing nodes: outbound requests, GraphQL calls, and the http_in /
//! http_out pair that couples a run to the request that triggered it.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::{forward_input, NodeExecutor};
use crate::engine::{NodeContext, StoredResponse};
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};
use crate::placeholder::{resolve_json_placeholders, resolve_placeholders};

/// Issues an HTTP request. `url`, `body`, and each header value go through
/// the textual placeholder resolver first. Output: `{statusCode, body,
/// json?}` where `json` is set iff the body parses.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        HttpRequestNode {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let method = node.prop_str("method").unwrap_or("GET").to_uppercase();
        let url = node.prop_str("url").unwrap_or("");
        if url.is_empty() {
            return Err(NodeError::Config("http_request node: url is required".to_string()));
        }
        let url = resolve_placeholders(url, &input)?;

        let body = match node.prop_str("body") {
            Some(b) if !b.is_empty() => resolve_placeholders(b, &input)?,
            _ => String::new(),
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::Config(format!("http_request node: bad method {method:?}")))?;
        let mut request = self.client.request(method, &url);

        // Headers arrive either as an object or a JSON string.
        let headers = match node.properties.get("headers") {
            Some(Value::Object(map)) => Some(map.clone()),
            Some(Value::String(s)) if !s.is_empty() => {
                serde_json::from_str::<JsonMap>(s).ok()
            }
            _ => None,
        };
        if let Some(headers) = headers {
            for (name, value) in headers {
                let text = crate::placeholder::stringify(&value);
                let resolved = resolve_placeholders(&text, &input).unwrap_or(text);
                request = request.header(name, resolved);
            }
        }

        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body_text = response.text().await?;

        let mut output = JsonMap::new();
        output.insert("statusCode".to_string(), json!(status));
        output.insert("body".to_string(), json!(body_text));
        if let Ok(parsed) = serde_json::from_str::<Value>(&body_text) {
            output.insert("json".to_string(), parsed);
        }
        Ok(output)
    }
}

/// Trigger entry for HTTP-in flows: stamps trigger metadata and forwards the
/// request data the dispatcher injected.
pub struct HttpInNode;

#[async_trait]
impl NodeExecutor for HttpInNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        _node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let mut output = JsonMap::new();
        output.insert("triggered".to_string(), json!(true));
        output.insert("triggeredAt".to_string(), json!(Utc::now().to_rfc3339()));
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Writes the HTTP response of the request that triggered the run, through
/// the coupling carried on the context. No-op passthrough outside an
/// HTTP-triggered run or when a response was already sent.
pub struct HttpOutNode;

#[async_trait]
impl NodeExecutor for HttpOutNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let Some(coupling) = &ctx.http else {
            return Ok(input);
        };
        if coupling.sent() {
            return Ok(input);
        }

        // Status: properties first, then input, then 200.
        let input_status = input.get("statusCode").and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        });
        let status = node.prop_i64("statusCode").or(input_status).unwrap_or(200) as u16;

        // Body preference: input.body (string) > input.payload (JSON) >
        // the whole input (JSON).
        let body: Vec<u8> = match input.get("body") {
            Some(Value::String(s)) if !s.is_empty() => s.clone().into_bytes(),
            _ => match input.get("payload") {
                Some(payload) => serde_json::to_vec(payload)?,
                None => serde_json::to_vec(&input)?,
            },
        };

        let content_type = node
            .prop_str("contentType")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                input
                    .get("contentType")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/json".to_string());

        coupling.write(StoredResponse {
            status,
            content_type,
            body,
        });

        let mut output = JsonMap::new();
        output.insert("sent".to_string(), json!(true));
        output.insert("statusCode".to_string(), json!(status));
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// POSTs `{query, variables}` to a GraphQL endpoint. `{{…}}` placeholders in
/// the variables JSON are substituted with JSON encoding so types survive.
/// GraphQL-level errors fail the node even when transport returned 200.
pub struct GraphqlNode {
    client: reqwest::Client,
}

impl GraphqlNode {
    pub fn new() -> Self {
        GraphqlNode {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GraphqlNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for GraphqlNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let url = node.prop_str("url").unwrap_or("");
        if url.is_empty() {
            return Err(NodeError::Config("graphql node: url is required".to_string()));
        }
        let query = node.prop_str("query").unwrap_or("");
        if query.is_empty() {
            return Err(NodeError::Config("graphql node: query is required".to_string()));
        }

        let variables: Value = match node.prop_str("variables") {
            Some(raw) if !raw.is_empty() => {
                let resolved = resolve_json_placeholders(raw, &input)?;
                serde_json::from_str(&resolved).map_err(|e| {
                    NodeError::Config(format!("graphql node: variables JSON: {e}"))
                })?
            }
            _ => json!({}),
        };

        let mut request = self
            .client
            .post(url)
            .json(&json!({"query": query, "variables": variables}));
        if let Some(Value::Object(headers)) = node.properties.get("headers") {
            for (name, value) in headers {
                request = request.header(name, crate::placeholder::stringify(value));
            }
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body_text = response.text().await?;

        let mut output = JsonMap::new();
        output.insert("statusCode".to_string(), json!(status));
        output.insert("body".to_string(), json!(body_text));

        if let Ok(parsed) = serde_json::from_str::<Value>(&body_text) {
            if let Some(data) = parsed.get("data") {
                output.insert("data".to_string(), data.clone());
            }
            if let Some(Value::Array(errors)) = parsed.get("errors") {
                if !errors.is_empty() {
                    let messages: Vec<&str> = errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .collect();
                    return Err(NodeError::Execution(format!(
                        "graphql errors: {}",
                        messages.join("; ")
                    )));
                }
            }
        }

        forward_input(&mut output, input);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HttpCoupling;
    use crate::nodes::test_support::{ctx, node_with_props, obj};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_http_out_without_coupling_is_passthrough() {
        let node = node_with_props("o", "http_out", json!({}));
        let input = obj(json!({"x": 1}));
        let out = HttpOutNode.execute(&ctx().await, &node, input.clone()).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_http_out_writes_response_and_sets_flag() {
        let coupling = Arc::new(HttpCoupling::new());
        let mut ctx = ctx().await;
        ctx.http = Some(coupling.clone());

        let node = node_with_props("o", "http_out", json!({"statusCode": 201}));
        let out = HttpOutNode
            .execute(&ctx, &node, obj(json!({"payload": {"a": 1}})))
            .await
            .unwrap();
        assert_eq!(out.get("sent"), Some(&json!(true)));
        assert_eq!(out.get("statusCode"), Some(&json!(201)));

        assert!(coupling.sent());
        let resp = coupling.take_response().unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(resp.body, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_http_out_prefers_string_body_over_payload() {
        let coupling = Arc::new(HttpCoupling::new());
        let mut ctx = ctx().await;
        ctx.http = Some(coupling.clone());

        let node = node_with_props("o", "http_out", json!({"contentType": "text/plain"}));
        HttpOutNode
            .execute(&ctx, &node, obj(json!({"body": "hello", "payload": {"a": 1}})))
            .await
            .unwrap();
        let resp = coupling.take_response().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_http_out_second_write_is_a_noop() {
        let coupling = Arc::new(HttpCoupling::new());
        let mut ctx = ctx().await;
        ctx.http = Some(coupling.clone());

        let node = node_with_props("o", "http_out", json!({"statusCode": 201}));
        HttpOutNode.execute(&ctx, &node, obj(json!({"body": "one"}))).await.unwrap();
        let out = HttpOutNode.execute(&ctx, &node, obj(json!({"body": "two"}))).await.unwrap();
        // Passthrough, no "sent" marker added by the second call.
        assert!(out.get("sent").is_none());
        assert_eq!(coupling.take_response().unwrap().body, b"one");
    }

    #[tokio::test]
    async fn test_http_request_requires_url() {
        let node = node_with_props("r", "http_request", json!({}));
        assert!(HttpRequestNode::new()
            .execute(&ctx().await, &node, JsonMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_request_unresolvable_placeholder_errors() {
        let node = node_with_props(
            "r",
            "http_request",
            json!({"url": "http://localhost/{{missing.path}}"}),
        );
        let err = HttpRequestNode::new()
            .execute(&ctx().await, &node, JsonMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingPath(_)));
    }

    #[tokio::test]
    async fn test_http_in_stamps_trigger_metadata() {
        let node = node_with_props("i", "http_in", json!({}));
        let out = HttpInNode
            .execute(&ctx().await, &node, obj(json!({"method": "POST"})))
            .await
            .unwrap();
        assert_eq!(out.get("triggered"), Some(&json!(true)));
        assert!(out.contains_key("triggeredAt"));
        assert_eq!(out.get("method"), Some(&json!("POST")));
    }
}
