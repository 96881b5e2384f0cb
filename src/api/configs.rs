use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{bad_request, store_error, ApiResult, AppState};
use crate::model::{JsonMap, NodeConfig};
use crate::store::NodeConfigStore;

#[derive(Deserialize)]
pub struct NodeConfigDto {
    pub name: String,
    #[serde(rename = "type")]
    pub config_type: String,
    #[serde(default)]
    pub config: JsonMap,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeConfig>>> {
    let list = state.engine.stores().node_configs.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<NodeConfig>> {
    let cfg = state.engine.stores().node_configs.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(cfg))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<NodeConfigDto>,
) -> ApiResult<(StatusCode, Json<NodeConfig>)> {
    if dto.name.is_empty() || dto.config_type.is_empty() {
        return Err(bad_request("name and type are required"));
    }
    let cfg = state
        .engine
        .stores()
        .node_configs
        .create(NodeConfig {
            id: 0,
            name: dto.name,
            config_type: dto.config_type,
            config: dto.config,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(cfg)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<NodeConfigDto>,
) -> ApiResult<Json<NodeConfig>> {
    if dto.name.is_empty() || dto.config_type.is_empty() {
        return Err(bad_request("name and type are required"));
    }
    let existing = state.engine.stores().node_configs.get_by_id(id).await.map_err(store_error)?;
    let cfg = state
        .engine
        .stores()
        .node_configs
        .update(NodeConfig {
            id,
            name: dto.name,
            config_type: dto.config_type,
            config: dto.config,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;
    Ok(Json(cfg))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.engine.stores().node_configs.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
