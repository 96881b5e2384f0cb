use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{bad_request, store_error, ApiResult, AppState};
use crate::model::{Definition, Workflow};
use crate::store::WorkflowStore;

#[derive(Deserialize)]
pub struct WorkflowDto {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub definition: Definition,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Workflow>>> {
    let list = state.engine.stores().workflows.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Workflow>> {
    let wf = state.engine.stores().workflows.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(wf))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<WorkflowDto>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    if dto.name.is_empty() {
        return Err(bad_request("name is required"));
    }
    let wf = state
        .engine
        .stores()
        .workflows
        .create(Workflow {
            id: 0,
            name: dto.name,
            description: dto.description,
            definition: dto.definition,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(wf)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<WorkflowDto>,
) -> ApiResult<Json<Workflow>> {
    if dto.name.is_empty() {
        return Err(bad_request("name is required"));
    }
    let existing = state.engine.stores().workflows.get_by_id(id).await.map_err(store_error)?;
    let updated = state
        .engine
        .stores()
        .workflows
        .update(Workflow {
            id,
            name: dto.name,
            description: dto.description,
            definition: dto.definition,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.engine.stores().workflows.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Export: name, description, and definition, byte-for-byte re-importable.
pub async fn export(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let wf = state.engine.stores().workflows.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(json!({
        "name": wf.name,
        "description": wf.description,
        "definition": wf.definition,
        "exportedAt": wf.updated_at,
    })))
}

pub async fn import(
    State(state): State<AppState>,
    Json(dto): Json<WorkflowDto>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    create(State(state), Json(dto)).await
}
