use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{store_error, ApiResult, AppState};
use crate::model::EmailTrigger;
use crate::store::EmailTriggerStore;

#[derive(Deserialize)]
pub struct EmailTriggerDto {
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
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<EmailTrigger>>> {
    let list = state.engine.stores().email_triggers.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<EmailTrigger>> {
    let t = state.engine.stores().email_triggers.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(t))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<EmailTriggerDto>,
) -> ApiResult<(StatusCode, Json<EmailTrigger>)> {
    let trigger = state
        .engine
        .stores()
        .email_triggers
        .create(EmailTrigger {
            id: 0,
            workflow_id: dto.workflow_id,
            config_id: dto.config_id,
            mailbox: if dto.mailbox.is_empty() { "INBOX".to_string() } else { dto.mailbox },
            poll_interval_sec: dto.poll_interval_sec,
            mark_seen: dto.mark_seen,
            max_fetch: dto.max_fetch,
            enabled: dto.enabled,
            last_poll_at: None,
            msg_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    if trigger.enabled {
        state.poller.add_trigger(&trigger).await;
    }
    Ok((StatusCode::CREATED, Json(trigger)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<EmailTriggerDto>,
) -> ApiResult<Json<EmailTrigger>> {
    let existing = state.engine.stores().email_triggers.get_by_id(id).await.map_err(store_error)?;
    let trigger = state
        .engine
        .stores()
        .email_triggers
        .update(EmailTrigger {
            id,
            workflow_id: dto.workflow_id,
            config_id: dto.config_id,
            mailbox: if dto.mailbox.is_empty() { "INBOX".to_string() } else { dto.mailbox },
            poll_interval_sec: dto.poll_interval_sec,
            mark_seen: dto.mark_seen,
            max_fetch: dto.max_fetch,
            enabled: dto.enabled,
            last_poll_at: existing.last_poll_at,
            msg_count: existing.msg_count,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    if trigger.enabled {
        state.poller.add_trigger(&trigger).await;
    } else {
        state.poller.remove_trigger(trigger.id).await;
    }
    Ok(Json(trigger))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.poller.remove_trigger(id).await;
    state.engine.stores().email_triggers.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
