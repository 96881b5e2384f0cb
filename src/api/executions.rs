use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{store_error, ApiResult, AppState};
use crate::engine::{debug_channel, RunOptions};
use crate::model::{Execution, ExecutionLog};
use crate::store::{DayStat, ExecutionLogStore, ExecutionStore, WorkflowStore};

const DEFAULT_STATS_DAYS: u32 = 14;
const MAX_STATS_DAYS: u32 = 90;

/// Run a workflow synchronously. The execution id is returned even when the
/// run failed, so the caller can fetch its logs.
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let wf = state.engine.stores().workflows.get_by_id(id).await.map_err(store_error)?;

    match state.engine.run_workflow(&wf).await {
        Ok(outcome) => {
            let mut body = json!({
                "executionId": outcome.execution_id,
                "status": outcome.status,
            });
            if let Some(err) = &outcome.error {
                body["error"] = json!(err.to_string());
            }
            Ok(Json(body))
        }
        // The run never started (no nodes / store failure): no row exists.
        Err(e) => Ok(Json(json!({
            "executionId": 0,
            "status": "failed",
            "error": e.to_string(),
        }))),
    }
}

/// Run a workflow and stream the execution timeline as Server-Sent Events.
pub async fn execute_debug(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let wf = state.engine.stores().workflows.get_by_id(id).await.map_err(store_error)?;

    let (tx, rx) = debug_channel();
    let engine = state.engine.clone();
    tokio::spawn(async move {
        let _ = engine
            .run_with(
                &wf,
                RunOptions {
                    debug: Some(tx),
                    ..Default::default()
                },
            )
            .await;
    });

    // Stream drains until the engine drops its sender.
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(|event| Event::default().json_data(&event));

    let headers = [
        ("Cache-Control", "no-cache"),
        ("X-Accel-Buffering", "no"),
    ];
    Ok((headers, Sse::new(stream).keep_alive(KeepAlive::default())))
}

pub async fn list_by_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Execution>>> {
    let list = state
        .engine
        .stores()
        .executions
        .list_by_workflow(id)
        .await
        .map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Execution>> {
    let exec = state.engine.stores().executions.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(exec))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<ExecutionLog>>> {
    let logs = state
        .engine
        .stores()
        .execution_logs
        .list_by_execution(id)
        .await
        .map_err(store_error)?;
    Ok(Json(logs))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    days: Option<u32>,
}

#[derive(serde::Serialize)]
pub struct StatsResponse {
    #[serde(rename = "totalCount")]
    total_count: i64,
    #[serde(rename = "totalDurationSec")]
    total_duration_sec: f64,
    #[serde(rename = "avgDurationSec")]
    avg_duration_sec: f64,
    #[serde(rename = "minDurationSec")]
    min_duration_sec: f64,
    #[serde(rename = "maxDurationSec")]
    max_duration_sec: f64,
    #[serde(rename = "byDay")]
    by_day: Vec<DayStat>,
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let days = match query.days {
        Some(d) if (1..=MAX_STATS_DAYS).contains(&d) => d,
        _ => DEFAULT_STATS_DAYS,
    };

    let stores = state.engine.stores();
    let global = stores.executions.global_stats().await.map_err(store_error)?;
    let by_day = stores.executions.day_stats(days).await.map_err(store_error)?;

    Ok(Json(StatsResponse {
        total_count: global.total_count,
        total_duration_sec: global.total_duration_sec,
        avg_duration_sec: global.avg_duration_sec,
        min_duration_sec: global.min_duration_sec,
        max_duration_sec: global.max_duration_sec,
        by_day,
    }))
}
