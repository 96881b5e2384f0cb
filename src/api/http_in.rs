//! HTTP trigger CRUD plus the `/in/*` catch-all dispatcher that turns
//! inbound requests into workflow runs with response coupling.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{bad_request, store_error, ApiResult, AppState};
use crate::engine::HttpCoupling;
use crate::model::{HttpTrigger, JsonMap};
use crate::store::{HttpTriggerStore, StoreError, WorkflowStore};

#[derive(Deserialize)]
pub struct HttpTriggerDto {
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Stored paths are relative to the `/api/in/` prefix.
fn normalize_path(path: &str) -> String {
    let path = path
        .strip_prefix("/api/in/")
        .or_else(|| path.strip_prefix("api/in/"))
        .unwrap_or(path);
    path.trim_start_matches('/').to_string()
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<HttpTrigger>>> {
    let list = state.engine.stores().http_triggers.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<HttpTrigger>> {
    let t = state.engine.stores().http_triggers.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(t))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<HttpTriggerDto>,
) -> ApiResult<(StatusCode, Json<HttpTrigger>)> {
    if dto.path.is_empty() {
        return Err(bad_request("path is required"));
    }
    let trigger = state
        .engine
        .stores()
        .http_triggers
        .create(HttpTrigger {
            id: 0,
            workflow_id: dto.workflow_id,
            path: normalize_path(&dto.path),
            method: if dto.method.is_empty() { "POST".to_string() } else { dto.method.to_uppercase() },
            enabled: dto.enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<HttpTriggerDto>,
) -> ApiResult<Json<HttpTrigger>> {
    if dto.path.is_empty() {
        return Err(bad_request("path is required"));
    }
    let existing = state.engine.stores().http_triggers.get_by_id(id).await.map_err(store_error)?;
    let trigger = state
        .engine
        .stores()
        .http_triggers
        .update(HttpTrigger {
            id,
            workflow_id: dto.workflow_id,
            path: normalize_path(&dto.path),
            method: if dto.method.is_empty() { "POST".to_string() } else { dto.method.to_uppercase() },
            enabled: dto.enabled,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok(Json(trigger))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.engine.stores().http_triggers.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// The catch-all: look up an enabled trigger for (path, method), build the
/// run input from the request, and couple the run to this response. If no
/// `http_out` fires, a successful run answers 204 and a failed one answers
/// 500 with the execution id.
pub async fn dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = normalize_path(&path);

    let trigger = match state
        .engine
        .stores()
        .http_triggers
        .find_by_path_and_method(&path, method.as_str())
        .await
    {
        Ok(t) => t,
        Err(StoreError::NotFound) => {
            return (StatusCode::NOT_FOUND, "not found").into_response();
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let workflow = match state.engine.stores().workflows.get_by_id(trigger.workflow_id).await {
        Ok(wf) => wf,
        Err(e) => {
            warn!(trigger_id = trigger.id, error = %e, "http trigger points at missing workflow");
            return (StatusCode::INTERNAL_SERVER_ERROR, "workflow not found").into_response();
        }
    };

    // Input: method, path, query, headers, and the body twice over —
    // `payload`/`body` hold the JSON decoding when the body parses, else
    // the raw string.
    let mut input = JsonMap::new();
    input.insert("method".to_string(), json!(method.as_str()));
    input.insert("path".to_string(), json!(path));
    input.insert("query".to_string(), json!(query));

    let mut header_map = JsonMap::new();
    for (name, value) in &headers {
        if let Ok(text) = value.to_str() {
            header_map.insert(name.as_str().to_string(), json!(text));
        }
    }
    input.insert("headers".to_string(), Value::Object(header_map));

    if !body.is_empty() {
        let parsed: Option<Value> = serde_json::from_slice(&body).ok();
        let body_value = match parsed {
            Some(v) => v,
            None => json!(String::from_utf8_lossy(&body)),
        };
        input.insert("payload".to_string(), body_value.clone());
        input.insert("body".to_string(), body_value);
    }

    let coupling = Arc::new(HttpCoupling::new());
    let run = state
        .engine
        .run_workflow_for_http(&workflow, input, coupling.clone(), None)
        .await;

    match run {
        Ok((_outcome, true)) => {
            match coupling.take_response() {
                Some(stored) => {
                    let mut response = Response::new(stored.body.into());
                    *response.status_mut() = StatusCode::from_u16(stored.status)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    if let Ok(ct) = stored.content_type.parse() {
                        response.headers_mut().insert(axum::http::header::CONTENT_TYPE, ct);
                    }
                    response
                }
                // Sent flag without a stored response cannot happen via
                // http_out; answer as if nothing was written.
                None => StatusCode::NO_CONTENT.into_response(),
            }
        }
        Ok((outcome, false)) => {
            if outcome.is_completed() {
                StatusCode::NO_CONTENT.into_response()
            } else {
                let error = outcome
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "execution failed".to_string());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": error, "executionId": outcome.execution_id})),
                )
                    .into_response()
            }
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string(), "executionId": 0})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/in/webhook"), "webhook");
        assert_eq!(normalize_path("api/in/a/b"), "a/b");
        assert_eq!(normalize_path("/hook"), "hook");
        assert_eq!(normalize_path("hook"), "hook");
    }
}
