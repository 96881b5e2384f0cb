use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{bad_request, store_error, ApiResult, AppState};
use crate::model::ConfigStoreEntry;
use crate::store::ConfigStore;

const MASK: &str = "********";

#[derive(Deserialize)]
pub struct SetEntryDto {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize)]
pub struct MaskedEntry {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Default listing masks values; only keys and descriptions are shown.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<MaskedEntry>>> {
    let entries = state.engine.stores().config_store.list().await.map_err(store_error)?;
    let masked = entries
        .into_iter()
        .map(|e| MaskedEntry {
            key: e.key,
            value: if e.value.is_empty() { String::new() } else { MASK.to_string() },
            description: e.description,
            created_at: e.created_at,
            updated_at: e.updated_at,
        })
        .collect();
    Ok(Json(masked))
}

/// Unmasked listing for the editor view.
pub async fn list_full(State(state): State<AppState>) -> ApiResult<Json<Vec<ConfigStoreEntry>>> {
    let entries = state.engine.stores().config_store.list().await.map_err(store_error)?;
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ConfigStoreEntry>> {
    let entry = state.engine.stores().config_store.get_entry(&key).await.map_err(store_error)?;
    Ok(Json(entry))
}

pub async fn set(
    State(state): State<AppState>,
    Json(dto): Json<SetEntryDto>,
) -> ApiResult<(StatusCode, Json<ConfigStoreEntry>)> {
    if dto.key.is_empty() {
        return Err(bad_request("key is required"));
    }
    let entry = state
        .engine
        .stores()
        .config_store
        .set(&dto.key, &dto.value, &dto.description)
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.stores().config_store.delete(&key).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
